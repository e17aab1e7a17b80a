//! Interval aggregation (§4.3): composes stored one-minute bars into any
//! supported coarser interval on read, never on write.
//!
//! Grounded on the teacher's `timeframe_status.rs` bucketing intent, but the
//! actual composition rule here is new: open = first bar's open, close =
//! last bar's close, high/low = extrema across the bucket, volume = sum.
//! A bucket with at least one stored bar but fewer than
//! `interval.as_minutes()` of them is still emitted — completeness is a
//! concern for [`crate::historical`], not for aggregation itself.

use crate::interval::Interval;
use crate::model::Bar;

/// Aggregates `minute_bars` (assumed pre-sorted ascending by `timestamp_ms`,
/// all for the same pair) into `interval`-sized buckets.
///
/// Bucket boundaries are aligned to UTC epoch, i.e. bucket `k` covers
/// `[k * interval_ms, (k+1) * interval_ms)`. At `OneMinute` this is the
/// identity transform.
pub fn aggregate(minute_bars: &[Bar], interval: Interval) -> Vec<Bar> {
    if interval == Interval::OneMinute {
        return minute_bars.to_vec();
    }
    let bucket_ms = interval.as_millis();

    let mut out: Vec<Bar> = Vec::new();
    for bar in minute_bars {
        let bucket_start = (bar.timestamp_ms / bucket_ms) * bucket_ms;
        match out.last_mut() {
            Some(last) if last.timestamp_ms == bucket_start => {
                last.high = last.high.max(bar.high);
                last.low = last.low.min(bar.low);
                last.close = bar.close;
                last.volume += bar.volume;
                last.volume_quote += bar.volume_quote;
                last.volume_quote_estimated = last.volume_quote_estimated || bar.volume_quote_estimated;
                last.confirm = last.confirm && bar.confirm;
            }
            _ => out.push(Bar {
                pair: bar.pair.clone(),
                timestamp_ms: bucket_start,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
                volume_quote: bar.volume_quote,
                volume_quote_estimated: bar.volume_quote_estimated,
                confirm: bar.confirm,
            }),
        }
    }
    out
}

/// Returns at most the last `limit` aggregated bars, computed over the full
/// `minute_bars` slice so a trailing partial bucket aggregates correctly.
pub fn latest(minute_bars: &[Bar], interval: Interval, limit: usize) -> Vec<Bar> {
    let mut bars = aggregate(minute_bars, interval);
    if bars.len() > limit {
        bars.drain(0..bars.len() - limit);
    }
    bars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::Interval;

    fn minute_bar(ts: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            pair: "BTC-USDT".to_string(),
            timestamp_ms: ts,
            open,
            high,
            low,
            close,
            volume,
            volume_quote: volume * close,
            volume_quote_estimated: false,
            confirm: true,
        }
    }

    #[test]
    fn one_minute_aggregation_is_identity() {
        let bars = vec![minute_bar(0, 1.0, 2.0, 0.5, 1.5, 10.0)];
        let out = aggregate(&bars, Interval::OneMinute);
        assert_eq!(out, bars);
    }

    #[test]
    fn composes_fifteen_one_minute_bars_into_one_bucket() {
        // 15 consecutive minute bars for pair BTC-USDT, k = 0..14, each with
        // open=close=k, high=k+0.5, low=k-0.5, volume=1 (§8 scenario 4 shape).
        let bars: Vec<Bar> = (0..15)
            .map(|k| minute_bar(k as i64 * 60_000, k as f64, k as f64 + 0.5, k as f64 - 0.5, k as f64, 1.0))
            .collect();

        let out = aggregate(&bars, Interval::FifteenMinutes);
        assert_eq!(out.len(), 1);
        let bucket = &out[0];
        assert_eq!(bucket.timestamp_ms, 0);
        assert_eq!(bucket.open, 0.0);
        assert_eq!(bucket.close, 14.0);
        assert_eq!(bucket.high, 14.5);
        assert_eq!(bucket.low, -0.5);
        assert_eq!(bucket.volume, 15.0);
    }

    #[test]
    fn bucket_boundaries_align_to_epoch_not_to_first_bar() {
        // First bar starts mid-bucket (minute 5 of a 15m bucket starting at 0).
        let bars = vec![
            minute_bar(5 * 60_000, 1.0, 1.0, 1.0, 1.0, 1.0),
            minute_bar(20 * 60_000, 2.0, 2.0, 2.0, 2.0, 1.0),
        ];
        let out = aggregate(&bars, Interval::FifteenMinutes);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].timestamp_ms, 0);
        assert_eq!(out[1].timestamp_ms, 15 * 60_000);
    }

    #[test]
    fn partial_trailing_bucket_is_still_emitted() {
        let bars = vec![minute_bar(0, 1.0, 1.0, 1.0, 1.0, 1.0)];
        let out = aggregate(&bars, Interval::OneHour);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn latest_trims_to_the_tail() {
        let bars: Vec<Bar> = (0..5)
            .map(|k| minute_bar(k as i64 * 60_000, 1.0, 1.0, 1.0, 1.0, 1.0))
            .collect();
        let out = latest(&bars, Interval::OneMinute, 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].timestamp_ms, 3 * 60_000);
        assert_eq!(out[1].timestamp_ms, 4 * 60_000);
    }

    #[test]
    fn unconfirmed_bar_marks_whole_bucket_unconfirmed() {
        let mut bars = vec![
            minute_bar(0, 1.0, 1.0, 1.0, 1.0, 1.0),
            minute_bar(60_000, 1.0, 1.0, 1.0, 1.0, 1.0),
        ];
        bars[1].confirm = false;
        let out = aggregate(&bars, Interval::FiveMinutes);
        assert!(!out[0].confirm);
    }
}
