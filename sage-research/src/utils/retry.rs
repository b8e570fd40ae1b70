//! Retry with bounded exponential backoff
//!
//! Used for two kinds of transient failure:
//! - Scoring service rate limits and outages (policy derived from `RateLimitConfig`)
//! - SQLite lock contention in the session store
//!
//! Non-retryable errors are returned immediately. After `max_retries`
//! retries the last error is returned to the caller, which decides how to
//! degrade.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::models::RateLimitConfig;

/// Errors that may succeed when retried
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Server-provided wait hint, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for sage_common::Error {
    fn is_retryable(&self) -> bool {
        self.is_lock_contention()
    }
}

/// Backoff schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub factor: f64,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_rate_limit(config: &RateLimitConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            factor: config.backoff_factor.max(1.0),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// 10ms doubling to 1s, for database lock contention
    pub fn lock_contention() -> Self {
        Self {
            max_retries: 8,
            initial_backoff: Duration::from_millis(10),
            factor: 2.0,
            max_backoff: Duration::from_millis(1000),
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.factor.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

/// Run `operation`, retrying retryable errors per `policy`
///
/// # Arguments
/// * `operation_name` - Name for logging
/// * `policy` - Backoff schedule
/// * `operation` - Async closure performing one attempt
pub async fn retry_with_backoff<T, E, F, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retry = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if retry > 0 {
                    tracing::debug!(operation = operation_name, retries = retry, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if !err.is_retryable() {
                    return Err(err);
                }
                if retry >= policy.max_retries {
                    tracing::warn!(
                        operation = operation_name,
                        retries = retry,
                        error = %err,
                        "Retries exhausted"
                    );
                    return Err(err);
                }

                retry += 1;
                let computed = policy.backoff_for(retry);
                let delay = err
                    .retry_after()
                    .map(|hint| hint.max(computed).min(policy.max_backoff))
                    .unwrap_or(computed);

                tracing::warn!(
                    operation = operation_name,
                    retry,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, will retry after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Fatal,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(100),
            factor: 2.0,
            max_backoff: Duration::from_millis(350),
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let p = policy(5);
        assert_eq!(p.backoff_for(1), Duration::from_millis(100));
        assert_eq!(p.backoff_for(2), Duration::from_millis(200));
        assert_eq!(p.backoff_for(3), Duration::from_millis(350));
        assert_eq!(p.backoff_for(30), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_errors() {
        let attempts = AtomicU32::new(0);

        let result = retry_with_backoff("test_op", &policy(3), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_retries() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), TestError> = retry_with_backoff("test_op", &policy(2), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Transient) }
        })
        .await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), TestError> = retry_with_backoff("test_op", &policy(5), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Fatal) }
        })
        .await;

        assert!(matches!(result, Err(TestError::Fatal)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
