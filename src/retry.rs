//! Retry logic with linear backoff
//!
//! This module provides configurable retry logic for transient failures.
//! Each attempt runs under a per-attempt timeout; delays between attempts
//! grow linearly with optional jitter, and no attempt starts after the
//! policy's overall deadline has elapsed.
//!
//! # Example
//!
//! ```no_run
//! use data_sync::retry::run_with_retry;
//! use data_sync::config::RetryPolicy;
//! use data_sync::error::Error;
//!
//! # async fn example() -> Result<(), Error> {
//! let policy = RetryPolicy::default();
//! let result = run_with_retry(&policy, || async {
//!     // Your operation here
//!     Ok::<_, Error>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets, busy resources) should return `true`.
/// Permanent failures (bad input, constraint violations, logic errors) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

/// Implementation of IsRetryable for our Error type
impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Attempt timeouts are transient by definition
            Error::Timeout => true,
            // I/O errors can be retryable in some cases
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Artifact backend errors need to be classified based on content
            Error::Artifact(msg) => {
                msg.contains("timeout") || msg.contains("busy") || msg.contains("temporary")
            }
            // Database errors should not be retried (likely permanent)
            Error::Database(_) | Error::Sqlx(_) => false,
            // Config errors are permanent
            Error::Config { .. } => false,
            // Job state errors are permanent
            Error::Job(_) => false,
            // Malformed data is permanent
            Error::Csv(_) | Error::Serialization(_) => false,
            // The collation count invariant never heals by retrying
            Error::CollationMismatch { .. } => false,
            // Unknown errors - be conservative and don't retry
            Error::Other(_) => false,
        }
    }
}

/// Execute an async operation under a retry policy
///
/// Each attempt is wrapped in the policy's per-attempt timeout (reported as
/// [`Error::Timeout`]). Retryable failures back off linearly
/// (`backoff_step * attempt`, optionally jittered) until attempts or the
/// overall deadline run out.
///
/// # Arguments
///
/// * `policy` - Retry policy (attempts, timeouts, backoff step, deadline, jitter)
/// * `operation` - Async closure returning `Result<T>`
///
/// # Returns
///
/// Returns the successful result or the last error once attempts are exhausted.
pub async fn run_with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let outcome = match tokio::time::timeout(policy.attempt_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        };

        match outcome {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                let deadline_left = started.elapsed() < policy.overall_deadline;
                if !e.is_retryable() {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                    return Err(e);
                }
                if attempt >= policy.max_attempts || !deadline_left {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        deadline_exceeded = !deadline_left,
                        "Operation failed after all retry attempts exhausted"
                    );
                    return Err(e);
                }

                let delay = policy.backoff_step * attempt;
                let delay = if policy.jitter { add_jitter(delay) } else { delay };

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay lands between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> Error {
        Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"))
    }

    fn permanent() -> Error {
        Error::Other("permanent error".to_string())
    }

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            attempt_timeout: Duration::from_secs(5),
            backoff_step: Duration::from_millis(10),
            overall_deadline: Duration::from_secs(60),
            jitter: false,
        }
    }

    #[tokio::test]
    async fn success_needs_no_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = run_with_retry(&quick_policy(3), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn transient_errors_retry_then_succeed() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = run_with_retry(&quick_policy(3), || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 { Err(transient()) } else { Ok(42) }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(
            counter.load(Ordering::SeqCst),
            3,
            "should retry twice before success"
        );
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = run_with_retry(&quick_policy(3), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(transient())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(
            counter.load(Ordering::SeqCst),
            3,
            "max_attempts bounds total calls"
        );
    }

    #[tokio::test]
    async fn permanent_error_does_not_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = run_with_retry(&quick_policy(5), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(permanent())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(
            counter.load(Ordering::SeqCst),
            1,
            "should not retry permanent error"
        );
    }

    #[tokio::test]
    async fn backoff_grows_linearly() {
        let policy = RetryPolicy {
            max_attempts: 4,
            attempt_timeout: Duration::from_secs(5),
            backoff_step: Duration::from_millis(50),
            overall_deadline: Duration::from_secs(60),
            jitter: false,
        };

        let timestamps = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let ts_clone = timestamps.clone();

        let _result = run_with_retry(&policy, || {
            let ts = ts_clone.clone();
            async move {
                ts.lock().await.push(Instant::now());
                Err::<i32, _>(transient())
            }
        })
        .await;

        let ts = timestamps.lock().await;
        assert_eq!(ts.len(), 4, "initial + 3 retries = 4 calls");

        // Gaps should be ~50ms, ~100ms, ~150ms (step * attempt)
        let gap1 = ts[1].duration_since(ts[0]);
        let gap2 = ts[2].duration_since(ts[1]);
        let gap3 = ts[3].duration_since(ts[2]);

        assert!(
            gap1 >= Duration::from_millis(40),
            "first delay should be ~50ms, was {:?}",
            gap1
        );
        assert!(
            gap2 >= Duration::from_millis(80),
            "second delay should be ~100ms, was {:?}",
            gap2
        );
        assert!(
            gap3 >= Duration::from_millis(130),
            "third delay should be ~150ms, was {:?}",
            gap3
        );
    }

    #[tokio::test]
    async fn attempt_timeout_counts_as_transient_failure() {
        let policy = RetryPolicy {
            max_attempts: 2,
            attempt_timeout: Duration::from_millis(20),
            backoff_step: Duration::from_millis(5),
            overall_deadline: Duration::from_secs(60),
            jitter: false,
        };

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = run_with_retry(&policy, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<i32, _>(1)
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(
            counter.load(Ordering::SeqCst),
            2,
            "timed-out attempts should retry up to max_attempts"
        );
    }

    #[tokio::test]
    async fn overall_deadline_stops_retrying() {
        let policy = RetryPolicy {
            max_attempts: 100,
            attempt_timeout: Duration::from_secs(5),
            backoff_step: Duration::from_millis(30),
            overall_deadline: Duration::from_millis(50),
            jitter: false,
        };

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let _result = run_with_retry(&policy, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Err::<i32, _>(transient())
            }
        })
        .await;

        let calls = counter.load(Ordering::SeqCst);
        assert!(
            calls < 10,
            "deadline should stop retries long before max_attempts, got {calls} calls"
        );
    }

    #[test]
    fn io_timeout_is_retryable() {
        assert!(transient().is_retryable());

        let connection_refused = Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(connection_refused.is_retryable());

        let not_found = Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "not found",
        ));
        assert!(!not_found.is_retryable());
    }

    #[test]
    fn permanent_errors_are_not_retryable() {
        use crate::error::{DatabaseError, JobError};
        use crate::types::JobId;

        assert!(
            !Error::Config {
                message: "bad config".to_string(),
                key: None,
            }
            .is_retryable()
        );
        assert!(
            !Error::Database(DatabaseError::QueryFailed("db error".to_string())).is_retryable()
        );
        assert!(!Error::Job(JobError::NotFound { id: JobId(1) }).is_retryable());
        assert!(
            !Error::CollationMismatch {
                expected: 3,
                found: 2
            }
            .is_retryable()
        );
        assert!(!Error::Other("unknown".to_string()).is_retryable());
    }

    #[test]
    fn artifact_errors_retry_only_on_transient_keywords() {
        assert!(Error::Artifact("backend timeout".to_string()).is_retryable());
        assert!(Error::Artifact("resource busy".to_string()).is_retryable());
        assert!(!Error::Artifact("no such object".to_string()).is_retryable());
    }

    #[test]
    fn add_jitter_stays_within_bounds_over_many_iterations() {
        let delay = Duration::from_millis(50);
        // Run enough iterations that a bounds violation would almost certainly surface
        for i in 0..200 {
            let jittered = add_jitter(delay);
            assert!(
                jittered >= delay,
                "iteration {i}: jittered {jittered:?} < base delay {delay:?}"
            );
            assert!(
                jittered <= delay * 2,
                "iteration {i}: jittered {jittered:?} > 2x base delay {:?}",
                delay * 2
            );
        }
    }

    #[test]
    fn add_jitter_on_zero_delay_returns_zero() {
        let jittered = add_jitter(Duration::ZERO);
        assert_eq!(jittered, Duration::ZERO);
    }
}
