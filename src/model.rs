//! Core record types (§3): the one-minute bar and the watched-pair entry.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};

/// A one-minute (or aggregated) OHLCV bar keyed by `(pair, timestamp_ms)`.
///
/// Invariants enforced by [`Bar::validate`]: `low <= min(open, close) <=
/// max(open, close) <= high`, `volume >= 0`, `volume_quote >= 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub pair: String,
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub volume_quote: f64,
    /// True when `volume_quote` was not supplied by the source and was
    /// back-filled from `volume` as a least-bad fallback (resolves the Open
    /// Question about silently conflating missing quote-volume with base
    /// volume: flag it instead).
    pub volume_quote_estimated: bool,
    /// 1 = exchange-closed bar, 0 = in-progress. Only `confirm = 1` bars are
    /// ever written from the streaming path.
    pub confirm: bool,
}

impl Bar {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.timestamp_ms % 60_000 != 0 {
            return Err(CoreError::Validation(format!(
                "timestamp {} is not aligned to a 60000ms boundary",
                self.timestamp_ms
            )));
        }
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if !(self.low <= body_low && body_high <= self.high && self.low <= self.high) {
            return Err(CoreError::Validation(format!(
                "OHLC invariant violated: low={} open={} close={} high={}",
                self.low, self.open, self.close, self.high
            )));
        }
        if self.volume < 0.0 || self.volume_quote < 0.0 {
            return Err(CoreError::Validation(
                "volume and volume_quote must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// A pair the stream collector should (or should not) be actively watching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedPair {
    pub pair: String,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Store-wide coverage summary for a pair, returned by `CandleStore::stats`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub count: i64,
    pub min_ts: Option<i64>,
    pub max_ts: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_bar() -> Bar {
        Bar {
            pair: "BTC-USDT".to_string(),
            timestamp_ms: 60_000,
            open: 100.0,
            high: 105.0,
            low: 95.0,
            close: 102.0,
            volume: 10.0,
            volume_quote: 1000.0,
            volume_quote_estimated: false,
            confirm: true,
        }
    }

    #[test]
    fn accepts_well_formed_bar() {
        assert!(valid_bar().validate().is_ok());
    }

    #[test]
    fn rejects_misaligned_timestamp() {
        let mut bar = valid_bar();
        bar.timestamp_ms = 60_001;
        assert!(bar.validate().is_err());
    }

    #[test]
    fn rejects_high_below_body() {
        let mut bar = valid_bar();
        bar.high = 90.0;
        assert!(bar.validate().is_err());
    }

    #[test]
    fn rejects_negative_volume() {
        let mut bar = valid_bar();
        bar.volume = -1.0;
        assert!(bar.validate().is_err());
    }
}
