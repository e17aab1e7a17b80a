//! Watch-list-driven ingestion (C4): keeps the live stream subscriptions in
//! sync with the `coin_pair_watch` table.
//!
//! On startup, every enabled watched pair is (re-)subscribed so a process
//! restart doesn't silently stop ingesting a pair the operator had already
//! enabled. `add`/`remove` keep the store and the stream manager in lock
//! step; if persisting the watch-list change fails, the stream side is
//! rolled back rather than left subscribed to an untracked pair.

use crate::error::CoreResult;
use crate::exchange::stream::StreamCollector;
use crate::pair::PairId;
use crate::store::CandleStore;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Collector {
    store: Arc<CandleStore>,
    stream: Arc<StreamCollector>,
}

impl Collector {
    pub fn new(store: Arc<CandleStore>, stream: Arc<StreamCollector>) -> Self {
        Collector { store, stream }
    }

    /// Subscribes to every currently-enabled watched pair. Call once at
    /// startup, after the store and stream manager are both constructed.
    pub fn start(&self) -> CoreResult<()> {
        let pairs = self.store.list(true)?;
        for watched in pairs {
            match PairId::from_canonical(&watched.pair) {
                Ok(pair) => {
                    info!(pair = %pair, "resubscribing enabled pair at startup");
                    self.stream.subscribe(pair);
                }
                Err(e) => warn!(pair = %watched.pair, error = %e, "skipping malformed watched pair"),
            }
        }
        Ok(())
    }

    /// Adds `pair` to the watch list and starts streaming it. If the store
    /// write fails, the stream subscription is rolled back so state never
    /// drifts into "streaming but not recorded as watched".
    pub fn add(&self, pair: PairId) -> CoreResult<()> {
        self.stream.subscribe(pair.clone());
        if let Err(e) = self.store.add_or_enable(&pair, true) {
            self.stream.unsubscribe(pair);
            return Err(e);
        }
        Ok(())
    }

    /// Removing an already-removed pair is a no-op (idempotent), matching
    /// the stream manager's own idempotent unsubscribe.
    pub fn remove(&self, pair: PairId) -> CoreResult<()> {
        self.store.remove(&pair)?;
        self.stream.unsubscribe(pair);
        Ok(())
    }

    pub fn set_enabled(&self, pair: PairId, enabled: bool) -> CoreResult<()> {
        self.store.set_enabled(&pair, enabled)?;
        if enabled {
            self.stream.subscribe(pair);
        } else {
            self.stream.unsubscribe(pair);
        }
        Ok(())
    }
}
