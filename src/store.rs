//! Candle Store (C1, §4.1): a durable, keyed store of one-minute bars plus
//! the watched-pairs table, backed by a single embedded SQLite database.
//!
//! Mirrors the teacher's `DatabaseManager` shape (a struct wrapping a
//! `Connection`, schema created idempotently in the constructor) but adds the
//! transactional upsert-with-conflict-resolution the design notes in §9
//! insist both the stream collector and the backfill path depend on.

use crate::error::{CoreError, CoreResult};
use crate::model::{Bar, Stats, WatchedPair};
use crate::pair::PairId;
use chrono::{NaiveDate, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::Mutex;

/// Durable store of confirmed one-minute bars and the watch list, guarded by
/// a single mutex (§5: single-writer-style upserts, single-node deployment).
pub struct CandleStore {
    conn: Mutex<Connection>,
}

impl CandleStore {
    pub fn open(db_path: impl AsRef<Path>) -> CoreResult<Self> {
        let conn = Connection::open(db_path)?;
        Self::init_schema(&conn)?;
        Ok(CandleStore {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by the test suite and by short-lived tools.
    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(CandleStore {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS candle_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                coin_pair TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                volume_quote REAL NOT NULL,
                volume_quote_estimated INTEGER NOT NULL DEFAULT 0,
                confirm INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                UNIQUE(coin_pair, timestamp)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_candle_data_coin_pair ON candle_data(coin_pair)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_candle_data_timestamp ON candle_data(timestamp)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_candle_data_pair_ts_desc
             ON candle_data(coin_pair, timestamp DESC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS coin_pair_watch (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                coin_pair TEXT NOT NULL UNIQUE,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Insert or overwrite a single bar by `(pair, timestamp_ms)`. Atomic per call.
    pub fn upsert_bar(&self, bar: &Bar) -> CoreResult<()> {
        let conn = self.conn.lock().expect("candle store mutex poisoned");
        Self::upsert_one(&conn, bar)?;
        Ok(())
    }

    /// Upsert a whole batch inside one transaction. Bars may be in any order;
    /// within-batch conflicts resolve last-wins in iteration order (§4.1).
    pub fn upsert_batch(&self, bars: &[Bar]) -> CoreResult<()> {
        if bars.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().expect("candle store mutex poisoned");
        let tx = conn.transaction()?;
        for bar in bars {
            Self::upsert_one(&tx, bar)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert_one(conn: &Connection, bar: &Bar) -> rusqlite::Result<()> {
        let now = Utc::now().timestamp_millis();
        conn.execute(
            "INSERT INTO candle_data
                (coin_pair, timestamp, open, high, low, close, volume, volume_quote, volume_quote_estimated, confirm, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(coin_pair, timestamp) DO UPDATE SET
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                volume = excluded.volume,
                volume_quote = excluded.volume_quote,
                volume_quote_estimated = excluded.volume_quote_estimated,
                confirm = excluded.confirm",
            params![
                bar.pair,
                bar.timestamp_ms,
                bar.open,
                bar.high,
                bar.low,
                bar.close,
                bar.volume,
                bar.volume_quote,
                bar.volume_quote_estimated as i64,
                bar.confirm as i64,
                now,
            ],
        )?;
        Ok(())
    }

    /// Inclusive on both ends (§4.1 fixes this, unlike the ambiguous half-open
    /// option the design doc otherwise allows).
    pub fn scan(
        &self,
        pair: &PairId,
        from_ms: Option<i64>,
        to_ms: Option<i64>,
        limit: Option<usize>,
    ) -> CoreResult<Vec<Bar>> {
        let conn = self.conn.lock().expect("candle store mutex poisoned");
        let from_ms = from_ms.unwrap_or(i64::MIN);
        let to_ms = to_ms.unwrap_or(i64::MAX);
        let limit = limit.unwrap_or(i64::MAX as usize) as i64;

        let mut stmt = conn.prepare(
            "SELECT coin_pair, timestamp, open, high, low, close, volume, volume_quote, volume_quote_estimated, confirm
             FROM candle_data
             WHERE coin_pair = ?1 AND timestamp >= ?2 AND timestamp <= ?3
             ORDER BY timestamp ASC
             LIMIT ?4",
        )?;
        let bars = stmt
            .query_map(
                params![pair.canonical(), from_ms, to_ms, limit],
                Self::row_to_bar,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bars)
    }

    pub fn latest(&self, pair: &PairId) -> CoreResult<Option<Bar>> {
        let conn = self.conn.lock().expect("candle store mutex poisoned");
        let bar = conn
            .query_row(
                "SELECT coin_pair, timestamp, open, high, low, close, volume, volume_quote, volume_quote_estimated, confirm
                 FROM candle_data
                 WHERE coin_pair = ?1
                 ORDER BY timestamp DESC
                 LIMIT 1",
                params![pair.canonical()],
                Self::row_to_bar,
            )
            .optional()?;
        Ok(bar)
    }

    pub fn stats(&self, pair: &PairId) -> CoreResult<Stats> {
        let conn = self.conn.lock().expect("candle store mutex poisoned");
        let (count, min_ts, max_ts): (i64, Option<i64>, Option<i64>) = conn.query_row(
            "SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM candle_data WHERE coin_pair = ?1",
            params![pair.canonical()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(Stats {
            count,
            min_ts,
            max_ts,
        })
    }

    /// Deletes every bar, across all pairs, whose timestamp < `ms`. Returns
    /// the number of rows removed.
    pub fn delete_older_than(&self, ms: i64) -> CoreResult<i64> {
        let conn = self.conn.lock().expect("candle store mutex poisoned");
        let deleted = conn.execute("DELETE FROM candle_data WHERE timestamp < ?1", params![ms])?;
        Ok(deleted as i64)
    }

    /// Deletes bars whose timestamp lies in `[00:00, next day 00:00)` of
    /// `date`, interpreted in UTC (§4.1 fixes the timezone to resolve the
    /// Open Question the distilled spec left ambiguous).
    pub fn delete_on_day(&self, date: NaiveDate) -> CoreResult<i64> {
        let start = Utc
            .from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("valid midnight"))
            .timestamp_millis();
        let end = start + 86_400_000;
        let conn = self.conn.lock().expect("candle store mutex poisoned");
        let deleted = conn.execute(
            "DELETE FROM candle_data WHERE timestamp >= ?1 AND timestamp < ?2",
            params![start, end],
        )?;
        Ok(deleted as i64)
    }

    fn row_to_bar(row: &Row) -> rusqlite::Result<Bar> {
        Ok(Bar {
            pair: row.get(0)?,
            timestamp_ms: row.get(1)?,
            open: row.get(2)?,
            high: row.get(3)?,
            low: row.get(4)?,
            close: row.get(5)?,
            volume: row.get(6)?,
            volume_quote: row.get(7)?,
            volume_quote_estimated: row.get::<_, i64>(8)? != 0,
            confirm: row.get::<_, i64>(9)? != 0,
        })
    }

    // -- Watch list --------------------------------------------------------

    pub fn add_or_enable(&self, pair: &PairId, enabled: bool) -> CoreResult<()> {
        let conn = self.conn.lock().expect("candle store mutex poisoned");
        let now = Utc::now().timestamp_millis();
        conn.execute(
            "INSERT INTO coin_pair_watch (coin_pair, enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(coin_pair) DO UPDATE SET enabled = excluded.enabled, updated_at = excluded.updated_at",
            params![pair.canonical(), enabled as i64, now],
        )?;
        Ok(())
    }

    pub fn remove(&self, pair: &PairId) -> CoreResult<()> {
        let conn = self.conn.lock().expect("candle store mutex poisoned");
        conn.execute(
            "DELETE FROM coin_pair_watch WHERE coin_pair = ?1",
            params![pair.canonical()],
        )?;
        Ok(())
    }

    pub fn set_enabled(&self, pair: &PairId, enabled: bool) -> CoreResult<()> {
        let conn = self.conn.lock().expect("candle store mutex poisoned");
        let now = Utc::now().timestamp_millis();
        conn.execute(
            "UPDATE coin_pair_watch SET enabled = ?1, updated_at = ?2 WHERE coin_pair = ?3",
            params![enabled as i64, now, pair.canonical()],
        )?;
        Ok(())
    }

    pub fn list(&self, enabled_only: bool) -> CoreResult<Vec<WatchedPair>> {
        let conn = self.conn.lock().expect("candle store mutex poisoned");
        let sql = if enabled_only {
            "SELECT coin_pair, enabled, created_at, updated_at FROM coin_pair_watch WHERE enabled = 1 ORDER BY coin_pair"
        } else {
            "SELECT coin_pair, enabled, created_at, updated_at FROM coin_pair_watch ORDER BY coin_pair"
        };
        let mut stmt = conn.prepare(sql)?;
        let pairs = stmt
            .query_map([], |row| {
                Ok(WatchedPair {
                    pair: row.get(0)?,
                    enabled: row.get::<_, i64>(1)? != 0,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(pair: &str, ts: i64, close: f64) -> Bar {
        Bar {
            pair: pair.to_string(),
            timestamp_ms: ts,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1.0,
            volume_quote: 100.0,
            volume_quote_estimated: false,
            confirm: true,
        }
    }

    #[test]
    fn upsert_then_scan_round_trips() {
        let store = CandleStore::open_in_memory().unwrap();
        store.upsert_bar(&bar("BTC-USDT", 60_000, 100.0)).unwrap();
        store.upsert_bar(&bar("BTC-USDT", 120_000, 101.0)).unwrap();

        let pair = PairId::from_canonical("BTC-USDT").unwrap();
        let bars = store.scan(&pair, None, None, None).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp_ms, 60_000);
        assert_eq!(bars[1].timestamp_ms, 120_000);
    }

    #[test]
    fn upsert_is_idempotent_and_last_write_wins() {
        let store = CandleStore::open_in_memory().unwrap();
        store.upsert_bar(&bar("BTC-USDT", 60_000, 100.0)).unwrap();
        store.upsert_bar(&bar("BTC-USDT", 60_000, 100.0)).unwrap();
        store.upsert_bar(&bar("BTC-USDT", 60_000, 150.0)).unwrap();

        let pair = PairId::from_canonical("BTC-USDT").unwrap();
        let bars = store.scan(&pair, None, None, None).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 150.0);
    }

    #[test]
    fn batch_upsert_last_wins_within_batch() {
        let store = CandleStore::open_in_memory().unwrap();
        store
            .upsert_batch(&[
                bar("BTC-USDT", 60_000, 100.0),
                bar("BTC-USDT", 60_000, 200.0),
            ])
            .unwrap();

        let pair = PairId::from_canonical("BTC-USDT").unwrap();
        let bars = store.scan(&pair, None, None, None).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 200.0);
    }

    #[test]
    fn scan_range_is_inclusive_on_both_ends() {
        let store = CandleStore::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .upsert_bar(&bar("BTC-USDT", i * 60_000, i as f64))
                .unwrap();
        }
        let pair = PairId::from_canonical("BTC-USDT").unwrap();
        let bars = store.scan(&pair, Some(60_000), Some(180_000), None).unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].timestamp_ms, 60_000);
        assert_eq!(bars[2].timestamp_ms, 180_000);
    }

    #[test]
    fn latest_and_stats_reflect_absence() {
        let store = CandleStore::open_in_memory().unwrap();
        let pair = PairId::from_canonical("BTC-USDT").unwrap();
        assert!(store.latest(&pair).unwrap().is_none());
        let stats = store.stats(&pair).unwrap();
        assert_eq!(stats.count, 0);
        assert!(stats.min_ts.is_none());
        assert!(stats.max_ts.is_none());
    }

    #[test]
    fn delete_older_than_removes_exactly_the_old_bars() {
        let store = CandleStore::open_in_memory().unwrap();
        for i in 0..10 {
            store
                .upsert_bar(&bar("BTC-USDT", i * 60_000, i as f64))
                .unwrap();
        }
        let deleted = store.delete_older_than(5 * 60_000).unwrap();
        assert_eq!(deleted, 5);

        let pair = PairId::from_canonical("BTC-USDT").unwrap();
        let remaining = store.scan(&pair, None, None, None).unwrap();
        assert!(remaining.iter().all(|b| b.timestamp_ms >= 5 * 60_000));
        assert_eq!(remaining.len(), 5);
    }

    #[test]
    fn watch_list_add_enable_remove_round_trip() {
        let store = CandleStore::open_in_memory().unwrap();
        let pair = PairId::from_canonical("BTC-USDT").unwrap();

        store.add_or_enable(&pair, true).unwrap();
        let pairs = store.list(false).unwrap();
        assert_eq!(pairs.len(), 1);
        assert!(pairs[0].enabled);

        store.set_enabled(&pair, false).unwrap();
        assert!(store.list(true).unwrap().is_empty());
        assert_eq!(store.list(false).unwrap().len(), 1);

        store.remove(&pair).unwrap();
        assert!(store.list(false).unwrap().is_empty());
    }
}
