//! Typed error kinds shared across the core (§7 of the design doc).
//!
//! The boundary layer matches on `CoreError` to pick an HTTP status class;
//! everything below the boundary returns `Result<T, CoreError>` rather than
//! `anyhow::Error` so that distinction survives the call stack.

use thiserror::Error;

/// Error surfaced by any core component.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Unsupported interval, malformed pair, out-of-range limit. Never reaches
    /// the core; rejected at the boundary.
    #[error("validation error: {0}")]
    Validation(String),

    /// Network reset, rate-limit, temporary 5xx from the exchange. Retried by
    /// the exchange client before this variant is ever returned to a caller.
    #[error("transient exchange error: {0}")]
    TransientExchange(String),

    /// Unknown symbol, malformed response. Not retried.
    #[error("permanent exchange error: {0}")]
    PermanentExchange(String),

    /// Upsert or scan failure in the candle store.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// WebSocket protocol or server-reported error on the live stream.
    #[error("subscription error: {0}")]
    Subscription(String),
}

impl CoreError {
    /// True for the two exchange-error variants that originate from fetch/stream I/O.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::TransientExchange(_))
    }

    /// Maps a kind to the HTTP status class the boundary should answer with.
    pub fn status_class(&self) -> u16 {
        match self {
            CoreError::Validation(_) => 400,
            CoreError::Storage(_)
            | CoreError::TransientExchange(_)
            | CoreError::PermanentExchange(_)
            | CoreError::Subscription(_) => 500,
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
