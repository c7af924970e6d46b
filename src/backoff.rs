//! Bounded retry with exponential backoff
//!
//! Every call that leaves the process (analysis service, text extraction)
//! runs through [`BackoffPolicy::execute`]. Errors classify themselves via
//! [`Retryable`]: transient failures are retried after a delay that doubles
//! from `initial_delay`; permanent failures, and the last transient failure
//! once attempts run out, are returned to the caller unchanged.
//!
//! **Timing** with the defaults (5 attempts, 2000ms):
//! attempt 1, wait 2s, attempt 2, wait 4s, attempt 3, wait 8s, attempt 4,
//! wait 16s, attempt 5, give up. Total wait is
//! `initial_delay * (2^0 + ... + 2^(max_attempts - 2))`.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Default number of attempts, including the first call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(2000);

/// Classifies an error as worth retrying or not.
pub trait Retryable {
    /// True for rate-limit and temporary-unavailability signals.
    fn is_transient(&self) -> bool;
}

/// Details of a retry about to happen, handed to the retry observer.
#[derive(Debug)]
pub struct RetryNotice<'a, E> {
    /// The attempt that just failed (1-based)
    pub attempt: u32,
    pub max_attempts: u32,
    /// How long the executor will wait before the next attempt
    pub delay: Duration,
    pub error: &'a E,
}

/// Retry policy: attempt cap and initial delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    max_attempts: u32,
    initial_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy. `max_attempts` below one is raised to one.
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
        }
    }

    /// A policy that calls once and never waits.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Delay before retry number `retry` (1-based): `initial * 2^(retry-1)`.
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
    }

    /// Total time spent waiting when every attempt fails transiently.
    pub fn total_wait(&self) -> Duration {
        (1..self.max_attempts)
            .map(|retry| self.delay_before_retry(retry))
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    /// Run `operation` under this policy.
    pub async fn execute<T, E, F, Fut>(&self, operation_name: &str, operation: F) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(operation_name, |_| {}, operation).await
    }

    /// Run `operation` under this policy, reporting each retry to `on_retry`
    /// before the executor sleeps.
    pub async fn execute_with<T, E, F, Fut, R>(
        &self,
        operation_name: &str,
        mut on_retry: R,
        mut operation: F,
    ) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(&RetryNotice<'_, E>),
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_transient() => {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Permanent failure, not retrying"
                    );
                    return Err(err);
                }
                Err(err) if attempt >= self.max_attempts => {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Transient failure, retries exhausted"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay_before_retry(attempt);
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, will retry after backoff"
                    );
                    on_retry(&RetryNotice {
                        attempt,
                        max_attempts: self.max_attempts,
                        delay,
                        error: &err,
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Busy,
        Broken,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Busy => write!(f, "busy"),
                TestError::Broken => write!(f, "broken"),
            }
        }
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Busy)
        }
    }

    #[test]
    fn delays_double_from_initial() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_before_retry(1), Duration::from_secs(2));
        assert_eq!(policy.delay_before_retry(2), Duration::from_secs(4));
        assert_eq!(policy.delay_before_retry(3), Duration::from_secs(8));
        assert_eq!(policy.delay_before_retry(4), Duration::from_secs(16));
        assert_eq!(policy.total_wait(), Duration::from_secs(30));
    }

    #[test]
    fn huge_retry_numbers_saturate() {
        let policy = BackoffPolicy::new(100, Duration::from_secs(1));
        assert!(policy.delay_before_retry(64) >= Duration::from_secs(u32::MAX as u64));
    }

    #[test]
    fn zero_attempts_is_raised_to_one() {
        let policy = BackoffPolicy::new(0, Duration::from_millis(10));
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.total_wait(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_all_attempts() {
        let policy = BackoffPolicy::default();
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), TestError> = policy
            .execute("always busy", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Busy) }
            })
            .await;

        assert_eq!(result, Err(TestError::Busy));
        assert_eq!(calls.load(Ordering::SeqCst), DEFAULT_MAX_ATTEMPTS);
        // 2s + 4s + 8s + 16s
        assert_eq!(start.elapsed(), Duration::from_millis(2000 * (1 + 2 + 4 + 8)));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let policy = BackoffPolicy::default();
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), TestError> = policy
            .execute("broken", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Broken) }
            })
            .await;

        assert_eq!(result, Err(TestError::Broken));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let policy = BackoffPolicy::new(5, Duration::from_millis(100));
        let calls = AtomicU32::new(0);
        let mut notices = Vec::new();

        let result = policy
            .execute_with(
                "flaky",
                |notice: &RetryNotice<'_, TestError>| notices.push((notice.attempt, notice.delay)),
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n < 3 {
                            Err(TestError::Busy)
                        } else {
                            Ok(n)
                        }
                    }
                },
            )
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(
            notices,
            vec![
                (1, Duration::from_millis(100)),
                (2, Duration::from_millis(200)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_after_transient_stops_immediately() {
        let policy = BackoffPolicy::new(5, Duration::from_millis(50));
        let calls = AtomicU32::new(0);

        let result: Result<(), TestError> = policy
            .execute("degrading", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(TestError::Busy)
                    } else {
                        Err(TestError::Broken)
                    }
                }
            })
            .await;

        assert_eq!(result, Err(TestError::Broken));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
