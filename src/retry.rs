//! Bounded retry for device I/O
//!
//! A failed read is retried until a fixed elapsed-time budget is spent.
//! Only transient errors are retried.

use crate::config::SiteConfig;
use crate::error::{HelionError, Result};
use crate::logging::get_logger;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Default total budget for one operation
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(1);

/// Retry policy with an elapsed-time budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    budget: Duration,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BUDGET, Duration::from_millis(100))
    }
}

impl RetryPolicy {
    pub const fn new(budget: Duration, delay: Duration) -> Self {
        Self { budget, delay }
    }

    /// Single attempt, no retries
    pub const fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub const fn from_site(config: &SiteConfig) -> Self {
        Self::new(config.retry_budget(), config.retry_delay())
    }

    pub const fn budget(&self) -> Duration {
        self.budget
    }

    /// Execute `operation` until it succeeds, fails permanently or the budget is spent
    pub async fn execute<F, Fut, T>(&self, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if started.elapsed() + self.delay >= self.budget {
                        if attempts > 1 {
                            return Err(HelionError::timeout(format!(
                                "{what} failed after {attempts} attempts: {e}"
                            )));
                        }
                        return Err(e);
                    }
                    get_logger("retry").debug(&format!("{what} attempt {attempts} failed: {e}"));
                    sleep(self.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_millis(1));
        let result = policy
            .execute("read", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(HelionError::device("busy"))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<()> = policy
            .execute("read", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HelionError::not_supported("phases"))
            })
            .await;
        assert!(matches!(result, Err(HelionError::NotSupported { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_timeout() {
        let policy = RetryPolicy::new(Duration::from_millis(30), Duration::from_millis(5));
        let started = std::time::Instant::now();
        let result: Result<()> = policy
            .execute("read", || async { Err(HelionError::device("offline")) })
            .await;
        assert!(matches!(result, Err(HelionError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_no_retry_policy_returns_original_error() {
        let result: Result<()> = RetryPolicy::none()
            .execute("read", || async { Err(HelionError::device("offline")) })
            .await;
        assert!(matches!(result, Err(HelionError::Device { .. })));
    }
}
