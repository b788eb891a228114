//! Cooperative, terminal job cancellation.
//!
//! A cancellation request has two halves: a persisted flag on the job row,
//! visible to every process sharing the database, and an in-process
//! [`CancellationToken`] that wakes any wait in the scheduler immediately.
//! [`CancellationCoordinator::is_cancel_requested`] consults both, so a flag
//! written by a separate `smartdl cancel` invocation is still observed within
//! one recheck interval.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::job::{JobId, JobRepository, StoreError};
use crate::retry::CancelSignal;

/// Default interval at which long waits re-read the persisted flag.
pub const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Tracks cancellation requests for jobs.
///
/// Wrap in `Arc` and share between the scheduler and the submission side.
pub struct CancellationCoordinator {
    store: Arc<dyn JobRepository>,
    tokens: DashMap<JobId, CancellationToken>,
    recheck_interval: Duration,
}

impl std::fmt::Debug for CancellationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationCoordinator")
            .field("tracked_jobs", &self.tokens.len())
            .field("recheck_interval", &self.recheck_interval)
            .finish_non_exhaustive()
    }
}

impl CancellationCoordinator {
    /// Creates a coordinator over `store`.
    ///
    /// A zero `recheck_interval` is replaced by [`DEFAULT_RECHECK_INTERVAL`].
    #[must_use]
    pub fn new(store: Arc<dyn JobRepository>, recheck_interval: Duration) -> Self {
        let recheck_interval = if recheck_interval.is_zero() {
            DEFAULT_RECHECK_INTERVAL
        } else {
            recheck_interval
        };
        Self {
            store,
            tokens: DashMap::new(),
            recheck_interval,
        }
    }

    /// Requests cancellation of `job_id`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] for an unknown job, or
    /// [`StoreError::Database`] if the flag cannot be persisted.
    #[instrument(skip(self))]
    pub async fn request_cancel(&self, job_id: JobId) -> Result<(), StoreError> {
        self.store.request_cancel(job_id).await?;
        if let Some(token) = self.tokens.get(&job_id) {
            token.cancel();
        }
        info!(job_id, "cancellation requested");
        Ok(())
    }

    /// True if cancellation was requested in this process or persisted by any.
    ///
    /// A store failure is logged and read as "not cancelled"; the next check
    /// retries.
    #[instrument(skip(self))]
    pub async fn is_cancel_requested(&self, job_id: JobId) -> bool {
        if self
            .tokens
            .get(&job_id)
            .is_some_and(|token| token.is_cancelled())
        {
            return true;
        }

        match self.store.is_cancel_requested(job_id).await {
            Ok(true) => {
                debug!(job_id, "persisted cancellation flag observed");
                self.token(job_id).cancel();
                true
            }
            Ok(false) => false,
            Err(error) => {
                warn!(job_id, error = %error, "failed to read cancellation flag");
                false
            }
        }
    }

    /// Returns the in-process token for `job_id`, creating it on first use.
    #[must_use]
    pub fn token(&self, job_id: JobId) -> CancellationToken {
        self.tokens.entry(job_id).or_default().clone()
    }

    /// Forgets the token for a job that reached a terminal state.
    pub fn release(&self, job_id: JobId) {
        self.tokens.remove(&job_id);
    }

    /// Interval at which waits re-read the persisted flag.
    #[must_use]
    pub fn recheck_interval(&self) -> Duration {
        self.recheck_interval
    }

    /// Binds the coordinator to one job for use as a [`CancelSignal`].
    #[must_use]
    pub fn for_job(self: &Arc<Self>, job_id: JobId) -> JobCancellation {
        JobCancellation {
            token: self.token(job_id),
            coordinator: Arc::clone(self),
            job_id,
        }
    }
}

/// Cancellation view of a single job.
#[derive(Debug, Clone)]
pub struct JobCancellation {
    coordinator: Arc<CancellationCoordinator>,
    job_id: JobId,
    token: CancellationToken,
}

impl JobCancellation {
    /// The job this view watches.
    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// The in-process token, for use in `select!`.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Resolves once cancellation is requested here or persisted elsewhere.
    ///
    /// The persisted flag is re-read every recheck interval.
    pub async fn cancelled(&self) {
        while !self.wait_or_cancel(self.coordinator.recheck_interval).await {}
    }
}

#[async_trait]
impl CancelSignal for JobCancellation {
    async fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.coordinator.is_cancel_requested(self.job_id).await
    }

    async fn wait_or_cancel(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return self.is_cancelled().await;
            }
            let chunk = (deadline - now).min(self.coordinator.recheck_interval);

            tokio::select! {
                () = self.token.cancelled() => return true,
                () = tokio::time::sleep(chunk) => {}
            }

            if self.is_cancelled().await {
                return true;
            }
        }
    }
}
