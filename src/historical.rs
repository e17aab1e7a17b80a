//! Historical Service (C5, §4.5): the core algorithm. Given a pair, an
//! interval and a window, it measures how much of the window is already
//! stored, backfills whatever is missing, and returns the aggregated bars.
//!
//! Grounded on the teacher's `retriever.rs`/`backfill.rs` pairing (fetch one
//! batch, track progress, repeat), restructured around [`ChunkPlan`] and a
//! coverage decision instead of the teacher's "retry until the API returns
//! nothing" loop, which had no notion of partial acceptable coverage.

use crate::aggregator;
use crate::backfill::ChunkPlan;
use crate::error::CoreResult;
use crate::exchange::ExchangeClient;
use crate::interval::Interval;
use crate::model::Bar;
use crate::pair::PairId;
use crate::store::CandleStore;
use chrono::Utc;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const ONE_MINUTE_MS: i64 = 60_000;

/// Request-shape cache key, per §4.2: `(pair, interval, since|limit)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    pair: String,
    interval: &'static str,
    since_ms: Option<i64>,
    end_ms: Option<i64>,
    limit: Option<usize>,
}

/// Coverage thresholds named per §4.5/§9: exposed as configuration rather
/// than hardcoded literals, since the distilled spec flagged them as future
/// tuning candidates.
#[derive(Debug, Clone, Copy)]
pub struct HistoricalServiceConfig {
    /// Minimum `actual / expected` ratio to call a window complete when no
    /// tail gap reasoning applies.
    pub baseline_completeness: f64,
    /// Relaxed completeness ratio accepted when the only gap is a small tail
    /// past the latest stored bar.
    pub tail_relaxed_completeness: f64,
    /// A tail gap no larger than this fraction of the window still counts
    /// under `tail_relaxed_completeness`.
    pub tail_gap_fraction: f64,
}

impl Default for HistoricalServiceConfig {
    fn default() -> Self {
        HistoricalServiceConfig {
            baseline_completeness: 0.95,
            tail_relaxed_completeness: 0.80,
            tail_gap_fraction: 0.10,
        }
    }
}

pub struct HistoricalService<C: ExchangeClient> {
    store: Arc<CandleStore>,
    exchange: Arc<C>,
    config: HistoricalServiceConfig,
    /// Response caches keyed by request shape (§4.2), split by TTL tier
    /// (fine intervals expire faster than coarse ones). `None` when caching
    /// is disabled in configuration. Never consulted by [`Self::backfill`] —
    /// backfill always reads through to the exchange.
    cache: Option<CacheTiers>,
}

struct CacheTiers {
    fine: Cache<CacheKey, Arc<Vec<Bar>>>,
    coarse: Cache<CacheKey, Arc<Vec<Bar>>>,
}

impl CacheTiers {
    fn for_interval(&self, interval: Interval) -> &Cache<CacheKey, Arc<Vec<Bar>>> {
        if interval.as_minutes() < 30 { &self.fine } else { &self.coarse }
    }
}

/// A resolved query window, computed once so coverage and backfill share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    start_ms: i64,
    end_ms: i64,
}

impl<C: ExchangeClient> HistoricalService<C> {
    pub fn new(store: Arc<CandleStore>, exchange: Arc<C>, config: HistoricalServiceConfig) -> Self {
        HistoricalService {
            store,
            exchange,
            config,
            cache: Some(Self::build_cache()),
        }
    }

    pub fn without_cache(store: Arc<CandleStore>, exchange: Arc<C>, config: HistoricalServiceConfig) -> Self {
        HistoricalService {
            store,
            exchange,
            config,
            cache: None,
        }
    }

    fn build_cache() -> CacheTiers {
        CacheTiers {
            fine: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(30))
                .build(),
            coarse: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(600))
                .build(),
        }
    }

    pub async fn query(
        &self,
        pair: &PairId,
        interval: Interval,
        limit: Option<usize>,
        since_ms: Option<i64>,
        end_ms: Option<i64>,
    ) -> CoreResult<Vec<Bar>> {
        let cache_key = CacheKey {
            pair: pair.canonical(),
            interval: interval.canonical(),
            since_ms,
            end_ms,
            limit,
        };

        if let Some(tiers) = &self.cache {
            if let Some(hit) = tiers.for_interval(interval).get(&cache_key).await {
                debug!(pair = %pair, interval = %interval, "cache hit");
                return Ok((*hit).clone());
            }
        }

        let window = self.plan_window(interval, limit, since_ms, end_ms);
        info!(pair = %pair, interval = %interval, start = window.start_ms, end = window.end_ms, "resolved query window");

        if !self.is_complete(pair, window)? {
            self.backfill(pair, window).await;
        }

        // 1-minute requests are raw C1 rows: pass `limit` straight through to
        // `scan`, which returns the first `limit` in ascending order. Every
        // other interval aggregates the full window first, then keeps the
        // last `limit` buckets — aggregation has no meaning for 1m data, and
        // trimming to the *latest* buckets would silently change which bars
        // a 1m+limit request gets back.
        let aggregated = if interval == Interval::OneMinute {
            self.store.scan(pair, Some(window.start_ms), Some(window.end_ms), limit)?
        } else {
            let minute_bars = self
                .store
                .scan(pair, Some(window.start_ms), Some(window.end_ms), None)?;
            match limit {
                Some(limit) => aggregator::latest(&minute_bars, interval, limit),
                None => aggregator::aggregate(&minute_bars, interval),
            }
        };

        if let Some(tiers) = &self.cache {
            tiers
                .for_interval(interval)
                .insert(cache_key, Arc::new(aggregated.clone()))
                .await;
        }
        Ok(aggregated)
    }

    /// Resolves the query window. `end_ms` defaults to "now"; every span
    /// computed below (the `since`-only case included) is anchored to
    /// whichever `end_ms` the caller gave, not always to the live edge.
    fn plan_window(&self, interval: Interval, limit: Option<usize>, since_ms: Option<i64>, end_ms: Option<i64>) -> Window {
        let end_ms = end_ms.unwrap_or_else(|| Utc::now().timestamp_millis());
        match (since_ms, limit) {
            (Some(since_ms), _) => Window {
                start_ms: since_ms,
                end_ms,
            },
            (None, Some(limit)) => {
                let window_minutes = interval.as_minutes();
                let span_ms = (limit as i64) * window_minutes * ONE_MINUTE_MS;
                Window {
                    start_ms: end_ms - span_ms - interval.as_millis(),
                    end_ms,
                }
            }
            (None, None) => {
                let span_ms = 100 * interval.as_minutes() * ONE_MINUTE_MS;
                Window {
                    start_ms: end_ms - span_ms - interval.as_millis(),
                    end_ms,
                }
            }
        }
    }

    fn is_complete(&self, pair: &PairId, window: Window) -> CoreResult<bool> {
        let expected = (window.end_ms - window.start_ms) / ONE_MINUTE_MS;
        if expected == 0 {
            return Ok(true);
        }
        let actual = self
            .store
            .scan(pair, Some(window.start_ms), Some(window.end_ms), None)?
            .len() as i64;
        let latest = self.store.latest(pair)?;

        if let Some(latest) = &latest {
            if window.start_ms <= latest.timestamp_ms && latest.timestamp_ms < window.end_ms {
                let tail_gap_ms = window.end_ms - latest.timestamp_ms;
                let window_span_ms = window.end_ms - window.start_ms;
                let tail_fraction = tail_gap_ms as f64 / window_span_ms as f64;
                let threshold = if tail_fraction <= self.config.tail_gap_fraction {
                    self.config.tail_relaxed_completeness
                } else {
                    self.config.baseline_completeness
                };
                return Ok(actual as f64 / expected as f64 >= threshold);
            }
        }
        Ok(actual as f64 / expected as f64 >= self.config.baseline_completeness)
    }

    async fn backfill(&self, pair: &PairId, window: Window) {
        let latest = match self.store.latest(pair) {
            Ok(latest) => latest,
            Err(e) => {
                warn!(pair = %pair, error = %e, "failed to read latest bar before backfill");
                None
            }
        };

        let resume_from = match &latest {
            Some(latest) if latest.timestamp_ms + ONE_MINUTE_MS <= window.end_ms => {
                (latest.timestamp_ms + ONE_MINUTE_MS).max(window.start_ms)
            }
            Some(_) => window.start_ms,
            None => window.start_ms,
        };

        if resume_from > window.end_ms {
            debug!(pair = %pair, "nothing to backfill, already past window end");
            return;
        }

        let plan = ChunkPlan::new(resume_from, window.end_ms);
        for chunk in plan {
            match self
                .exchange
                .fetch_klines(pair, chunk.start_ms, chunk.end_ms, 1000)
                .await
            {
                Ok(bars) => {
                    let in_range: Vec<Bar> = bars
                        .into_iter()
                        .filter(|b| b.timestamp_ms >= chunk.start_ms && b.timestamp_ms <= chunk.end_ms)
                        .filter(|b| match b.validate() {
                            Ok(()) => true,
                            Err(reason) => {
                                warn!(pair = %pair, timestamp = b.timestamp_ms, reason = %reason, "dropping invalid bar from backfill");
                                false
                            }
                        })
                        .collect();
                    if let Err(e) = self.store.upsert_batch(&in_range) {
                        warn!(pair = %pair, error = %e, chunk_start = chunk.start_ms, "chunk upsert failed, skipping chunk");
                    } else {
                        debug!(pair = %pair, chunk_start = chunk.start_ms, chunk_end = chunk.end_ms, inserted = in_range.len(), "backfilled chunk");
                    }
                }
                Err(e) => {
                    warn!(pair = %pair, error = %e, chunk_start = chunk.start_ms, "chunk fetch failed, skipping chunk");
                }
            }
            if !chunk.is_last {
                tokio::time::sleep(ChunkPlan::between_chunk_delay()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::FakeExchangeClient;

    fn minute_bar(pair: &str, ts: i64) -> Bar {
        Bar {
            pair: pair.to_string(),
            timestamp_ms: ts,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
            volume_quote: 1.0,
            volume_quote_estimated: false,
            confirm: true,
        }
    }

    fn service(
        store: Arc<CandleStore>,
        exchange_bars: Vec<Bar>,
    ) -> HistoricalService<FakeExchangeClient> {
        HistoricalService::new(
            store,
            Arc::new(FakeExchangeClient::new(exchange_bars)),
            HistoricalServiceConfig::default(),
        )
    }

    #[test]
    fn empty_window_is_trivially_complete() {
        let store = Arc::new(CandleStore::open_in_memory().unwrap());
        let svc = service(store, vec![]);
        let pair = PairId::from_canonical("BTC-USDT").unwrap();
        let window = Window {
            start_ms: 1000,
            end_ms: 1000,
        };
        assert!(svc.is_complete(&pair, window).unwrap());
    }

    #[test]
    fn fully_stored_window_is_complete_without_exchange_calls() {
        let store = Arc::new(CandleStore::open_in_memory().unwrap());
        let pair = PairId::from_canonical("BTC-USDT").unwrap();
        for i in 0..10 {
            store.upsert_bar(&minute_bar("BTC-USDT", i * ONE_MINUTE_MS)).unwrap();
        }
        let svc = service(store, vec![]);
        let window = Window {
            start_ms: 0,
            end_ms: 10 * ONE_MINUTE_MS,
        };
        assert!(svc.is_complete(&pair, window).unwrap());
    }

    #[test]
    fn mostly_empty_window_is_not_complete() {
        let store = Arc::new(CandleStore::open_in_memory().unwrap());
        let pair = PairId::from_canonical("BTC-USDT").unwrap();
        store.upsert_bar(&minute_bar("BTC-USDT", 0)).unwrap();
        let svc = service(store, vec![]);
        let window = Window {
            start_ms: 0,
            end_ms: 100 * ONE_MINUTE_MS,
        };
        assert!(!svc.is_complete(&pair, window).unwrap());
    }

    #[test]
    fn small_tail_gap_past_latest_is_tolerated() {
        let store = Arc::new(CandleStore::open_in_memory().unwrap());
        let pair = PairId::from_canonical("BTC-USDT").unwrap();
        // 95 of 100 minutes stored, with the gap entirely at the tail.
        for i in 0..95 {
            store.upsert_bar(&minute_bar("BTC-USDT", i * ONE_MINUTE_MS)).unwrap();
        }
        let svc = service(store, vec![]);
        let window = Window {
            start_ms: 0,
            end_ms: 100 * ONE_MINUTE_MS,
        };
        assert!(svc.is_complete(&pair, window).unwrap());
    }

    #[tokio::test]
    async fn query_backfills_missing_bars_then_returns_them() {
        let store = Arc::new(CandleStore::open_in_memory().unwrap());
        let pair = PairId::from_canonical("BTC-USDT").unwrap();
        let exchange_bars: Vec<Bar> = (0..20).map(|i| minute_bar("BTC-USDT", i * ONE_MINUTE_MS)).collect();
        let svc = service(Arc::clone(&store), exchange_bars);

        let result = svc
            .query(&pair, Interval::OneMinute, None, Some(0), None)
            .await
            .unwrap();

        assert!(!result.is_empty());
        let stats = store.stats(&pair).unwrap();
        assert!(stats.count > 0);
    }

    #[tokio::test]
    async fn query_skips_backfill_when_already_complete() {
        let store = Arc::new(CandleStore::open_in_memory().unwrap());
        let pair = PairId::from_canonical("BTC-USDT").unwrap();
        for i in 0..10 {
            store.upsert_bar(&minute_bar("BTC-USDT", i * ONE_MINUTE_MS)).unwrap();
        }
        // No exchange bars available; if the service wrongly decided to
        // backfill, the result would still be complete anyway, so assert
        // directly on the returned bar count matching what's stored.
        let svc = service(Arc::clone(&store), vec![]);
        let result = svc
            .query(&pair, Interval::OneMinute, None, Some(0), None)
            .await
            .unwrap();
        assert_eq!(result.len(), 10);
    }

    #[tokio::test]
    async fn one_minute_query_with_limit_returns_earliest_n_not_latest_n() {
        let store = Arc::new(CandleStore::open_in_memory().unwrap());
        let pair = PairId::from_canonical("BTC-USDT").unwrap();
        // Anchor the window to "now" (rather than epoch 0) so the stored
        // bars fully cover it and `is_complete` short-circuits the backfill
        // path entirely — this test is only about the limit/ordering branch.
        let now_ms = Utc::now().timestamp_millis();
        let start_ms = now_ms - 10 * ONE_MINUTE_MS;
        for i in 0..10 {
            store
                .upsert_bar(&minute_bar("BTC-USDT", start_ms + i * ONE_MINUTE_MS))
                .unwrap();
        }
        let svc = service(Arc::clone(&store), vec![]);
        let result = svc
            .query(&pair, Interval::OneMinute, Some(3), Some(start_ms), None)
            .await
            .unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].timestamp_ms, start_ms);
        assert_eq!(result[2].timestamp_ms, start_ms + 2 * ONE_MINUTE_MS);
    }

    #[tokio::test]
    async fn query_respects_an_explicit_end_ms_bound() {
        let store = Arc::new(CandleStore::open_in_memory().unwrap());
        let pair = PairId::from_canonical("BTC-USDT").unwrap();
        let now_ms = Utc::now().timestamp_millis();
        let start_ms = now_ms - 10 * ONE_MINUTE_MS;
        for i in 0..10 {
            store
                .upsert_bar(&minute_bar("BTC-USDT", start_ms + i * ONE_MINUTE_MS))
                .unwrap();
        }
        let svc = service(Arc::clone(&store), vec![]);
        let end_ms = start_ms + 4 * ONE_MINUTE_MS;
        let result = svc
            .query(&pair, Interval::OneMinute, None, Some(start_ms), Some(end_ms))
            .await
            .unwrap();
        assert_eq!(result.len(), 5);
        assert!(result.iter().all(|b| b.timestamp_ms <= end_ms));
    }
}
