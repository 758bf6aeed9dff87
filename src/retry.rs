//! Bounded retry with exponential backoff for external provider calls.
//!
//! Retryability is carried as data on [`EngineError`] rather than driven by
//! exception flow: a provider call either succeeds, fails retryably (rate
//! limit, timeout, transient network error), or fails fatally. Only the
//! retryable class is retried here; fatal errors surface immediately.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EngineError, Result, Stage};

/// Backoff policy for external calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first (must be ≥ 1).
    pub max_attempts: u32,
    /// Delay before the first retry; doubled after each failure.
    pub base_delay: Duration,
    /// Ceiling on the per-retry delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries. Useful in tests.
    pub fn none() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// The delay to sleep before retry number `retry` (0-based).
    fn delay(&self, retry: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << retry.min(16));
        exp.min(self.max_delay)
    }
}

/// Run `op` under the policy, retrying retryable failures with exponential
/// backoff.
///
/// On budget exhaustion the last retryable error is folded into
/// [`EngineError::ProviderUnavailable`] for the given stage. Non-retryable
/// errors propagate immediately without consuming the budget.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, stage: Stage, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_message = String::new();

    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                last_message = err.to_string();
                if attempt + 1 < attempts {
                    let delay = policy.delay(attempt);
                    warn!(
                        %stage,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient provider failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    debug!(%stage, attempts, "retry budget exhausted");
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(EngineError::ProviderUnavailable { stage, attempts, message: last_message })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn transient() -> EngineError {
        EngineError::Provider {
            stage: Stage::Embedding,
            message: "rate limited".into(),
            retryable: true,
        }
    }

    fn fatal() -> EngineError {
        EngineError::Provider {
            stage: Stage::Embedding,
            message: "bad request".into(),
            retryable: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result = with_retry(&policy, Stage::Embedding, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(transient()) } else { Ok(n) } }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_provider_unavailable() {
        let policy = RetryPolicy { max_attempts: 2, ..RetryPolicy::default() };
        let result: Result<()> =
            with_retry(&policy, Stage::Generation, || async { Err(transient()) }).await;
        match result {
            Err(EngineError::ProviderUnavailable { stage, attempts, .. }) => {
                assert_eq!(stage, Stage::Generation);
                assert_eq!(attempts, 2);
            }
            other => panic!("expected ProviderUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<()> = with_retry(&policy, Stage::Embedding, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(fatal()) }
        })
        .await;
        assert!(matches!(result, Err(EngineError::Provider { retryable: false, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
        };
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(5), Duration::from_secs(4));
    }
}
