//! Backoff policy for transient backend failures.

use async_trait::async_trait;
use tokio::time::Duration;

use crate::config::RetryConfig;
use crate::Error;

/// Decides whether a failed attempt should be retried and after what delay.
#[async_trait]
pub trait ResiliencePolicy: Send + Sync {
    async fn should_retry(&self, attempt: u32, error: &Error) -> Option<Duration>;
}

/// Exponential backoff over [`RetryConfig`].
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Exponential backoff: min_delay * 2^attempt, capped at max_delay.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.min_delay_ms as u64;
        let cap = self.config.max_delay_ms as u64;
        let delay = base
            .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
            .min(cap);
        Duration::from_millis(delay)
    }
}

#[async_trait]
impl ResiliencePolicy for RetryPolicy {
    async fn should_retry(&self, attempt: u32, error: &Error) -> Option<Duration> {
        if attempt >= self.config.max_retries {
            return None;
        }
        if !error.is_retryable() {
            return None;
        }
        Some(self.backoff(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorContext;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries: 3,
            min_delay_ms: 100,
            max_delay_ms: 500,
        })
    }

    #[tokio::test]
    async fn delays_grow_exponentially_up_to_the_cap() {
        let policy = policy();
        let err = Error::backend_unavailable("x", true, ErrorContext::new());

        assert_eq!(
            policy.should_retry(0, &err).await,
            Some(Duration::from_millis(100))
        );
        assert_eq!(
            policy.should_retry(1, &err).await,
            Some(Duration::from_millis(200))
        );
        assert_eq!(
            policy.should_retry(2, &err).await,
            Some(Duration::from_millis(400))
        );
        assert_eq!(policy.should_retry(3, &err).await, None);
    }

    #[tokio::test]
    async fn non_retryable_errors_are_never_retried() {
        let policy = policy();
        let err = Error::backend_unavailable("x", false, ErrorContext::new());
        assert_eq!(policy.should_retry(0, &err).await, None);

        let err = Error::invalid_request("bad", ErrorContext::new());
        assert_eq!(policy.should_retry(0, &err).await, None);
    }
}
