//! Bounded, delayed, cancellation-aware retry combinator.
//!
//! [`run_with_retry`] drives one stage operation through a [`RetryPolicy`]:
//! attempt 1 runs immediately, and the delay before attempt `n + 1` is the
//! `n`-th entry of the backoff schedule (the last entry repeats when the
//! schedule is shorter than the attempt budget).
//!
//! Cancellation always wins. It is checked before every attempt, after every
//! failure, and throughout every backoff wait.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use smartdl_core::retry::RetryPolicy;
//!
//! let policy = RetryPolicy::default();
//! assert_eq!(policy.max_attempts(), 3);
//! assert_eq!(policy.delay_before(2), Duration::ZERO);
//! assert_eq!(policy.delay_before(3), Duration::from_secs(120));
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default number of attempts per stage, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default backoff schedule, in seconds.
pub const DEFAULT_BACKOFF_SECS: [u64; 3] = [0, 120, 480];

/// Attempt budget and delay schedule for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF_SECS
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, backoff: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Maximum attempts, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The configured backoff schedule.
    #[must_use]
    pub fn backoff(&self) -> &[Duration] {
        &self.backoff
    }

    /// Delay to wait before `attempt` (1-indexed). Attempt 1 never waits.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let index = usize::try_from(attempt - 2).unwrap_or(usize::MAX);
        self.backoff
            .get(index)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Sum of the delays a job waits when every attempt fails.
    #[must_use]
    pub fn total_backoff(&self) -> Duration {
        (2..=self.max_attempts)
            .map(|attempt| self.delay_before(attempt))
            .sum()
    }
}

/// How a failed attempt should be treated.
pub trait RetryableError: fmt::Display {
    /// The failure means the job was cancelled.
    fn is_cancellation(&self) -> bool {
        false
    }

    /// Another attempt could succeed.
    fn is_retryable(&self) -> bool {
        true
    }
}

/// A cancellation source the retry loop can poll and wait on.
#[async_trait]
pub trait CancelSignal: Send + Sync {
    /// True once cancellation has been requested.
    async fn is_cancelled(&self) -> bool;

    /// Sleeps for `delay` unless cancelled first. Returns true if cancelled.
    async fn wait_or_cancel(&self, delay: Duration) -> bool;
}

#[async_trait]
impl CancelSignal for CancellationToken {
    async fn is_cancelled(&self) -> bool {
        CancellationToken::is_cancelled(self)
    }

    async fn wait_or_cancel(&self, delay: Duration) -> bool {
        tokio::select! {
            () = self.cancelled() => true,
            () = tokio::time::sleep(delay) => CancellationToken::is_cancelled(self),
        }
    }
}

/// Result of running an operation through the retry loop.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// An attempt succeeded.
    Succeeded {
        /// Value produced by the successful attempt.
        value: T,
        /// Attempts made, including the successful one.
        attempts: u32,
    },
    /// Budget exhausted or a non-retryable failure.
    Failed {
        /// Last error, unchanged.
        error: E,
        /// Failed attempts made.
        attempts: u32,
    },
    /// Cancellation observed.
    Cancelled {
        /// Failed attempts made before cancellation.
        attempts: u32,
    },
}

/// Runs `operation` until it succeeds, fails for good, or is cancelled.
///
/// `operation` receives the 1-indexed attempt number. `on_failure` runs after
/// every failed attempt with the number of failures so far, before the
/// backoff wait starts.
pub async fn run_with_retry<T, E, Op, Fut, OnFail, FailFut>(
    policy: &RetryPolicy,
    cancel: &dyn CancelSignal,
    mut operation: Op,
    mut on_failure: OnFail,
) -> RetryOutcome<T, E>
where
    E: RetryableError,
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    OnFail: FnMut(u32) -> FailFut,
    FailFut: Future<Output = ()>,
{
    let mut failures = 0;

    loop {
        if cancel.is_cancelled().await {
            return RetryOutcome::Cancelled { attempts: failures };
        }

        let attempt = failures + 1;
        let error = match operation(attempt).await {
            Ok(value) => {
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt,
                };
            }
            Err(error) => error,
        };

        if error.is_cancellation() {
            debug!(attempt, "attempt ended by cancellation");
            return RetryOutcome::Cancelled { attempts: failures };
        }

        failures = attempt;
        on_failure(failures).await;

        if cancel.is_cancelled().await {
            return RetryOutcome::Cancelled { attempts: failures };
        }

        if !error.is_retryable() {
            warn!(attempt, error = %error, "non-retryable failure");
            return RetryOutcome::Failed {
                error,
                attempts: failures,
            };
        }

        if failures >= policy.max_attempts() {
            warn!(attempt, error = %error, "retry budget exhausted");
            return RetryOutcome::Failed {
                error,
                attempts: failures,
            };
        }

        let delay = policy.delay_before(attempt + 1);
        info!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "attempt failed, retrying"
        );

        if cancel.wait_or_cancel(delay).await {
            debug!(attempt, "cancelled during backoff");
            return RetryOutcome::Cancelled { attempts: failures };
        }
    }
}
