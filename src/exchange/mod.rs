//! Exchange boundary (C2, C3): historical REST fetch and live streaming.
//!
//! Both concrete pieces live behind [`ExchangeClient`] so the historical
//! service and the stream collector can be exercised with a fake in tests
//! without ever dialing the real exchange.

pub mod binance_client;
pub mod stream;

use crate::error::CoreError;
use crate::model::Bar;
use crate::pair::PairId;
use std::time::Duration;

/// Fetches confirmed historical bars from the exchange's REST API.
pub trait ExchangeClient: Send + Sync {
    /// Returns up to `limit` one-minute bars with `open_time` in
    /// `[start_ms, end_ms)`, ordered oldest first. An empty result means the
    /// exchange has nothing older than its own history horizon for `pair`.
    fn fetch_klines(
        &self,
        pair: &PairId,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Bar>, CoreError>> + Send;
}

#[cfg(test)]
pub(crate) use test_support::FakeExchangeClient;


/// Classifies an exchange failure so the retry loop knows whether to retry it.
pub type Classifier = fn(&CoreError) -> bool;

/// Shared backoff policy for exchange I/O (§9: a single named policy
/// replacing ad hoc retry loops scattered through the fetch and stream paths).
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub classifier: Classifier,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_delay: Duration, classifier: Classifier) -> Self {
        RetryPolicy {
            max_retries,
            base_delay,
            classifier,
        }
    }

    /// Default classifier: retry only errors the exchange client marked transient.
    pub fn default_classifier(err: &CoreError) -> bool {
        err.is_transient()
    }

    /// Exponential backoff delay before attempt number `attempt` (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    pub fn should_retry(&self, attempt: u32, err: &CoreError) -> bool {
        attempt < self.max_retries && (self.classifier)(err)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // delay_for(1)==2s, delay_for(2)==4s, delay_for(3)==8s, per §4.2's
        // "exponential backoff ... with delays 2^attempt seconds".
        RetryPolicy::new(3, Duration::from_secs(2), RetryPolicy::default_classifier)
    }
}

/// Runs `op` under `policy`, retrying transient failures with exponential backoff.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if policy.should_retry(attempt, &err) => {
                tokio::time::sleep(policy.delay_for(attempt)).await;
                continue;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn default_policy_backs_off_by_powers_of_two_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), RetryPolicy::default_classifier);
        let attempts = AtomicU32::new(0);

        let result: Result<i32, CoreError> = with_retry(&policy, || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(CoreError::TransientExchange("rate limited".into()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn never_retries_permanent_errors() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);

        let result: Result<i32, CoreError> = with_retry(&policy, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::PermanentExchange("unknown symbol".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), RetryPolicy::default_classifier);
        let attempts = AtomicU32::new(0);

        let result: Result<i32, CoreError> = with_retry(&policy, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::TransientExchange("still down".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
