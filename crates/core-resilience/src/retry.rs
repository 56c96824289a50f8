//! Retry with exponential backoff and jitter
//!
//! Each logical operation (one part upload, one page fetch, one existence
//! check) gets its own attempt counter. Between attempts the loop sleeps for
//!
//! ```text
//! delay(n) = min(max_delay, base_delay * 2^(n-1))
//! ```
//!
//! drawn uniformly from `[delay/2, delay]`. Failures are classified through
//! [`Classify`]: expected absence ends the loop with [`Outcome::Absent`],
//! transient failures are retried, permanent ones are returned immediately.
//!
//! # Example
//!
//! ```
//! use conveyor_core_resilience::{Classify, ErrorClass, Outcome, RetryPolicy, SilentObserver};
//!
//! #[derive(Debug)]
//! struct Flaky;
//!
//! impl std::fmt::Display for Flaky {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "flaky")
//!     }
//! }
//!
//! impl Classify for Flaky {
//!     fn classify(&self) -> ErrorClass {
//!         ErrorClass::Transient
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let policy = RetryPolicy::default();
//! let outcome = policy
//!     .execute("answer", &SilentObserver, |_attempt| async { Ok::<_, Flaky>(42) })
//!     .await
//!     .unwrap();
//! assert_eq!(outcome.completed(), Some(42));
//! # }
//! ```

use crate::error::{Classify, ErrorClass, RetryError};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Default number of attempts per operation
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Default delay cap
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Retry policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry (before jitter)
    pub base_delay: Duration,

    /// Upper bound on any single delay (before jitter)
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

/// Result of a retried operation that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    /// The operation succeeded
    Completed(T),

    /// The target does not exist; carries the "not found" error as reported
    Absent(E),
}

impl<T, E> Outcome<T, E> {
    /// The success value, if any
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Absent(_) => None,
        }
    }

    /// Treat absence as an error
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Outcome::Completed(value) => Ok(value),
            Outcome::Absent(e) => Err(e),
        }
    }

    /// Whether the target was absent
    pub fn is_absent(&self) -> bool {
        matches!(self, Outcome::Absent(_))
    }
}

/// Details of a non-final failed attempt
#[derive(Clone, Copy)]
pub struct RetryNotice<'a> {
    /// Name of the operation being retried
    pub label: &'a str,
    /// The attempt that just failed (1-based)
    pub attempt: u32,
    /// Configured attempt limit
    pub max_attempts: u32,
    /// How long the loop will sleep before the next attempt
    pub delay: Duration,
    /// The failure
    pub cause: &'a dyn fmt::Display,
}

impl fmt::Debug for RetryNotice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryNotice")
            .field("label", &self.label)
            .field("attempt", &self.attempt)
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .field("cause", &self.cause.to_string())
            .finish()
    }
}

/// Receives a notice for every non-final failed attempt
pub trait RetryObserver: Send + Sync {
    /// Called after a transient failure, before the backoff sleep
    fn on_retry(&self, notice: &RetryNotice<'_>);
}

/// Observer that ignores every notice
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentObserver;

impl RetryObserver for SilentObserver {
    fn on_retry(&self, _notice: &RetryNotice<'_>) {}
}

impl RetryPolicy {
    /// Create a policy with the given attempt limit and default delays
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Set the base and cap delays
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Attempt limit, never below one
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Un-jittered delay after the given failed attempt (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay after the given failed attempt, jittered uniformly into `[d/2, d]`
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        let upper = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        if upper == 0 {
            return Duration::ZERO;
        }
        let lower = upper / 2;
        Duration::from_nanos(rand::rng().random_range(lower..=upper))
    }

    /// Run `operation` until it succeeds, reports absence, fails permanently,
    /// or runs out of attempts.
    ///
    /// The closure receives the 1-based attempt number. The observer is told
    /// about every failure except the last one.
    pub async fn execute<T, E, F, Fut>(
        &self,
        label: &str,
        observer: &dyn RetryObserver,
        mut operation: F,
    ) -> Result<Outcome<T, E>, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let max_attempts = self.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match operation(attempt).await {
                Ok(value) => return Ok(Outcome::Completed(value)),
                Err(e) => e,
            };

            match err.classify() {
                ErrorClass::Absent => return Ok(Outcome::Absent(err)),
                ErrorClass::Permanent => return Err(RetryError::Permanent(err)),
                ErrorClass::Transient => {}
            }

            if attempt >= max_attempts {
                tracing::debug!(label, attempts = attempt, "retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.jittered_delay(attempt);
            observer.on_retry(&RetryNotice {
                label,
                attempt,
                max_attempts,
                delay,
                cause: &err,
            });
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Flaky,
        Gone,
        Denied,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Classify for TestError {
        fn classify(&self) -> ErrorClass {
            match self {
                TestError::Flaky => ErrorClass::Transient,
                TestError::Gone => ErrorClass::Absent,
                TestError::Denied => ErrorClass::Permanent,
            }
        }
    }

    struct CountingObserver(Arc<AtomicU32>);

    impl RetryObserver for CountingObserver {
        fn on_retry(&self, _notice: &RetryNotice<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_observer() -> (Arc<AtomicU32>, CountingObserver) {
        let warnings = Arc::new(AtomicU32::new(0));
        (warnings.clone(), CountingObserver(warnings))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(8), Duration::from_millis(10_000));
        assert_eq!(policy.backoff_delay(200), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::default();
        for attempt in 1..10 {
            let nominal = policy.backoff_delay(attempt);
            for _ in 0..50 {
                let jittered = policy.jittered_delay(attempt);
                assert!(jittered >= nominal / 2, "{:?} < {:?}/2", jittered, nominal);
                assert!(jittered <= nominal);
            }
        }
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0).attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3);
        let (warnings, observer) = counting_observer();
        let calls = AtomicU32::new(0);

        let outcome = policy
            .execute("put", &observer, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(TestError::Flaky)
                    } else {
                        Ok("etag")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Completed("etag"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(warnings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_never_exceeds_max_attempts() {
        let policy = RetryPolicy::new(3);
        let (warnings, observer) = counting_observer();
        let calls = AtomicU32::new(0);

        let err = policy
            .execute("put", &observer, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TestError::Flaky) }
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            RetryError::Exhausted {
                attempts: 3,
                last: TestError::Flaky
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(warnings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_stops_immediately() {
        let policy = RetryPolicy::new(5);
        let (warnings, observer) = counting_observer();
        let calls = AtomicU32::new(0);

        let outcome = policy
            .execute("head", &observer, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TestError::Gone) }
            })
            .await
            .unwrap();

        assert!(outcome.is_absent());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(warnings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let policy = RetryPolicy::new(5);
        let calls = AtomicU32::new(0);

        let err = policy
            .execute("put", &SilentObserver, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TestError::Denied) }
            })
            .await
            .unwrap_err();

        assert_eq!(err, RetryError::Permanent(TestError::Denied));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_between_attempts() {
        let policy = RetryPolicy::new(3);
        let start = tokio::time::Instant::now();

        let _ = policy
            .execute("get", &SilentObserver, |_| async {
                Err::<(), _>(TestError::Flaky)
            })
            .await;

        // two sleeps: [50,100]ms + [100,200]ms
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(150));
        assert!(elapsed <= Duration::from_millis(300));
    }
}
