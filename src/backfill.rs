//! Backfill chunk planning (C5 support, §9): walks a `[start, end)` window in
//! bounded-size chunks so a single backfill call never asks the exchange for
//! an unbounded range in one request.
//!
//! Grounded on the teacher's `run_backfill` iteration loop (fetch one batch,
//! pause, repeat until exhausted or the date limit is reached), replacing
//! its timeframe-keyed `Vec` of in-flight tasks with a plain restartable
//! iterator the historical service drives on its own async schedule, one
//! chunk at a time.

use std::time::Duration;

/// Exchange APIs commonly cap a single historical request's span; 24h of
/// one-minute bars (1440 candles) stays comfortably under Binance's 1000-bar
/// page size when paired with the default request limit, while keeping the
/// chunk count small for multi-year backfills.
pub const CHUNK_SPAN_MS: i64 = 24 * 60 * 60 * 1000;

/// A `[chunk_start, chunk_end)` span to request from the exchange, plus
/// whether this is the last chunk in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub start_ms: i64,
    pub end_ms: i64,
    pub is_last: bool,
}

/// A restartable walk over `[resume_from, end)`. Safe to drop and recreate
/// from `resume_from = last_successful_chunk.end_ms` after a failure; no
/// state is kept beyond the two bounds.
pub struct ChunkPlan {
    cursor: i64,
    end: i64,
    chunk_span_ms: i64,
}

impl ChunkPlan {
    pub fn new(resume_from_ms: i64, end_ms: i64) -> Self {
        Self::with_chunk_span(resume_from_ms, end_ms, CHUNK_SPAN_MS)
    }

    pub fn with_chunk_span(resume_from_ms: i64, end_ms: i64, chunk_span_ms: i64) -> Self {
        ChunkPlan {
            cursor: resume_from_ms,
            end: end_ms,
            chunk_span_ms,
        }
    }

    /// Delay to wait between successive chunk requests, matching the
    /// teacher's rate-limiting pause between backfill batches.
    pub fn between_chunk_delay() -> Duration {
        Duration::from_millis(250)
    }
}

impl Iterator for ChunkPlan {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.cursor >= self.end {
            return None;
        }
        let chunk_end = (self.cursor + self.chunk_span_ms).min(self.end);
        let chunk = Chunk {
            start_ms: self.cursor,
            end_ms: chunk_end,
            is_last: chunk_end >= self.end,
        };
        self.cursor = chunk_end;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_exact_multiple_of_chunk_span() {
        let plan = ChunkPlan::with_chunk_span(0, 300, 100);
        let chunks: Vec<_> = plan.collect();
        assert_eq!(
            chunks,
            vec![
                Chunk { start_ms: 0, end_ms: 100, is_last: false },
                Chunk { start_ms: 100, end_ms: 200, is_last: false },
                Chunk { start_ms: 200, end_ms: 300, is_last: true },
            ]
        );
    }

    #[test]
    fn final_chunk_is_truncated_to_end() {
        let plan = ChunkPlan::with_chunk_span(0, 250, 100);
        let chunks: Vec<_> = plan.collect();
        assert_eq!(chunks.last().unwrap().end_ms, 250);
        assert!(chunks.last().unwrap().is_last);
    }

    #[test]
    fn empty_range_yields_no_chunks() {
        let plan = ChunkPlan::new(500, 500);
        assert_eq!(plan.count(), 0);
    }

    #[test]
    fn resuming_mid_walk_continues_from_the_given_cursor() {
        let plan = ChunkPlan::with_chunk_span(150, 300, 100);
        let chunks: Vec<_> = plan.collect();
        assert_eq!(chunks[0].start_ms, 150);
        assert_eq!(chunks[0].end_ms, 250);
    }
}
