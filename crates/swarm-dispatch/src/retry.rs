//! Bounded tracker calls: per-attempt timeout plus exponential back-off.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::config::DispatchConfig;
use crate::errors::{DispatchError, DispatchResult};

/// Retry budget for one tracker operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            timeout: config.command_timeout,
            max_attempts: config.max_attempts.max(1),
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
        }
    }

    /// Delay before attempt `attempt + 1` (0-based `attempt`).
    pub fn backoff(&self, attempt: u32, factor: u32) -> Duration {
        let exp = 2u32.saturating_pow(attempt.min(16));
        self.base_delay
            .saturating_mul(exp)
            .saturating_mul(factor.max(1))
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

/// Run `op` until it succeeds, fails permanently, or the budget runs out.
///
/// Each attempt is bounded by `policy.timeout`; an elapsed timeout counts as
/// a transient failure.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> DispatchResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DispatchResult<T>>,
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::transient(
                operation,
                format!("timed out after {}s", policy.timeout.as_secs_f32()),
            )),
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retriable() => return Err(err),
            Err(err) => err,
        };

        attempt += 1;
        if attempt >= policy.max_attempts {
            error!(
                operation,
                attempts = attempt,
                error = %err,
                "Retry budget exhausted"
            );
            return Err(DispatchError::RetriesExhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        let delay = policy.backoff(attempt - 1, err.retry_category().backoff_factor());
        warn!(
            operation,
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient tracker failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(1),
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let p = policy();
        assert_eq!(p.backoff(0, 1), Duration::from_millis(100));
        assert_eq!(p.backoff(1, 1), Duration::from_millis(200));
        assert_eq!(p.backoff(2, 1), Duration::from_millis(250));
        assert_eq!(p.backoff(0, 4), Duration::from_millis(250));
        assert_eq!(p.backoff(40, 1), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let calls = &AtomicU32::new(0);
        let value = with_retry(&policy(), "issue view", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(DispatchError::transient("issue view", "502 Bad Gateway"))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let err = with_retry(&policy(), "issue edit", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(DispatchError::external("issue edit", "not found"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DispatchError::External { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_is_reported() {
        let calls = &AtomicU32::new(0);
        let err = with_retry(&policy(), "issue comment", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(DispatchError::rate_limit("issue comment", "429"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DispatchError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transient() {
        let calls = &AtomicU32::new(0);
        let err = with_retry(&policy(), "issue view", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, DispatchError>(())
        })
        .await
        .unwrap_err();
        let DispatchError::RetriesExhausted { last, .. } = err else {
            panic!("expected exhaustion");
        };
        assert!(matches!(*last, DispatchError::Transient { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
