//! Retention Scheduler (C6, §4.6): deletes bars older than the retention
//! window once per calendar day at a fixed UTC wall-clock time.
//!
//! Not grounded on any teacher module — the teacher had no retention job —
//! but the polling-loop shape follows the same `tokio::spawn` background-task
//! pattern as `realtime.rs::RealtimeManager::new`.

use crate::store::CandleStore;
use chrono::{NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{error, info};

pub const RETENTION_DAYS: i64 = 30;

pub struct RetentionScheduler {
    store: Arc<CandleStore>,
    fire_at: NaiveTime,
    retention_days: i64,
}

impl RetentionScheduler {
    pub fn new(store: Arc<CandleStore>) -> Self {
        RetentionScheduler {
            store,
            fire_at: NaiveTime::from_hms_opt(2, 0, 0).expect("valid time"),
            retention_days: RETENTION_DAYS,
        }
    }

    pub fn with_fire_at(mut self, fire_at: NaiveTime) -> Self {
        self.fire_at = fire_at;
        self
    }

    /// Runs the daily retention loop forever. Spawn this as a background task.
    pub async fn run(self) {
        loop {
            let sleep_for = self.duration_until_next_fire();
            info!(sleep_secs = sleep_for.as_secs(), "retention scheduler sleeping until next run");
            tokio::time::sleep(sleep_for).await;

            let cutoff_ms = Utc::now().timestamp_millis() - self.retention_days * 86_400_000;
            match self.store.delete_older_than(cutoff_ms) {
                Ok(deleted) => info!(deleted, cutoff_ms, "retention run completed"),
                Err(e) => error!(error = %e, "retention run failed, will retry tomorrow"),
            }
        }
    }

    fn duration_until_next_fire(&self) -> StdDuration {
        let now = Utc::now();
        let today_fire = Utc.from_utc_datetime(&now.date_naive().and_time(self.fire_at));
        let next_fire = if today_fire > now {
            today_fire
        } else {
            Utc.from_utc_datetime(&(now.date_naive() + chrono::Duration::days(1)).and_time(self.fire_at))
        };
        (next_fire - now).to_std().unwrap_or(StdDuration::from_secs(86_400))
    }
}
