//! Concrete [`ExchangeClient`] backed by the `binance` crate (C2).
//!
//! Grounded on the teacher's `retriever.rs::fetch_batch`/`insert_batch`: same
//! `Market::get_klines` call and the same string-to-f64 parsing, but wrapped
//! in `spawn_blocking` (the `binance` crate's HTTP client is synchronous) and
//! under the shared [`RetryPolicy`] instead of a bare 5-second sleep-and-retry.

use super::{ExchangeClient, RetryPolicy, with_retry};
use crate::error::CoreError;
use crate::model::Bar;
use crate::pair::PairId;
use binance::api::Binance;
use binance::market::Market;
use binance::model::KlineSummaries;

pub struct BinanceExchangeClient {
    market: Market,
    retry: RetryPolicy,
}

impl BinanceExchangeClient {
    pub fn new(retry: RetryPolicy) -> Self {
        BinanceExchangeClient {
            market: Market::new(None, None),
            retry,
        }
    }

    /// Binance's own kline interval spelling is identical to our canonical
    /// one-minute tag, so only the unit translation table lives here.
    fn fetch_once(
        market: &Market,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Result<Vec<Bar>, CoreError> {
        let summaries = market
            .get_klines(
                symbol,
                "1m",
                Some(limit as u16),
                Some(start_ms as u64),
                Some(end_ms as u64),
            )
            .map_err(|e| classify_binance_error(&e.to_string()))?;

        let KlineSummaries::AllKlineSummaries(klines) = summaries;

        let pair_tag = symbol.to_string();
        let bars = klines
            .into_iter()
            .map(|k| Bar {
                pair: pair_tag.clone(),
                timestamp_ms: k.open_time,
                open: k.open.parse().unwrap_or(0.0),
                high: k.high.parse().unwrap_or(0.0),
                low: k.low.parse().unwrap_or(0.0),
                close: k.close.parse().unwrap_or(0.0),
                volume: k.volume.parse().unwrap_or(0.0),
                volume_quote: k.quote_asset_volume.parse().unwrap_or(0.0),
                volume_quote_estimated: false,
                confirm: true,
            })
            .collect();
        Ok(bars)
    }
}

impl ExchangeClient for BinanceExchangeClient {
    async fn fetch_klines(
        &self,
        pair: &PairId,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Result<Vec<Bar>, CoreError> {
        let symbol = pair.exchange_symbol();
        let canonical = pair.canonical();

        with_retry(&self.retry, || {
            let market = self.market.clone();
            let symbol = symbol.clone();
            let canonical = canonical.clone();
            async move {
                tokio::task::spawn_blocking(move || {
                    Self::fetch_once(&market, &symbol, start_ms, end_ms, limit)
                })
                .await
                .map_err(|e| CoreError::TransientExchange(format!("join error: {e}")))?
                .map(|bars| retag(bars, &canonical))
            }
        })
        .await
    }
}

/// The exchange returns bars tagged with its own wire symbol; retag to our
/// canonical `BASE-QUOTE` form before anything downstream sees them.
fn retag(bars: Vec<Bar>, canonical_pair: &str) -> Vec<Bar> {
    bars.into_iter()
        .map(|mut b| {
            b.pair = canonical_pair.to_string();
            b
        })
        .collect()
}

fn classify_binance_error(message: &str) -> CoreError {
    let lowered = message.to_lowercase();
    if lowered.contains("429")
        || lowered.contains("timeout")
        || lowered.contains("timed out")
        || lowered.contains("connection")
        || lowered.contains("502")
        || lowered.contains("503")
    {
        CoreError::TransientExchange(message.to_string())
    } else {
        CoreError::PermanentExchange(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retag_rewrites_pair_to_canonical_form() {
        let bars = vec![Bar {
            pair: "BTCUSDT".to_string(),
            timestamp_ms: 60_000,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
            volume_quote: 1.0,
            volume_quote_estimated: false,
            confirm: true,
        }];
        let retagged = retag(bars, "BTC-USDT");
        assert_eq!(retagged[0].pair, "BTC-USDT");
    }

    #[test]
    fn classifies_rate_limit_as_transient() {
        assert!(classify_binance_error("429 Too Many Requests").is_transient());
    }

    #[test]
    fn classifies_unknown_symbol_as_permanent() {
        assert!(!classify_binance_error("Invalid symbol.").is_transient());
    }
}
