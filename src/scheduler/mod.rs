//! Single-slot job scheduler.
//!
//! One job at a time moves through
//! `Pending → Classifying → Extracting → SizeCheck → Downloading → Completed`.
//! Classifying, Extracting and Downloading each run under their own retry
//! policy; a failure there ends in `Failed`, a cancellation request at any
//! suspension point ends in `Cancelled`. SizeCheck rejects declared sizes
//! above the ceiling as `SkippedTooLarge` before any byte is transferred.
//!
//! Stage failures never escape [`Scheduler::process_next`]: they become a
//! state transition plus a stored error. Only store errors are returned.

mod monitor;

use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use self::monitor::{AttemptContext, run_attempt};
use crate::cancel::{CancellationCoordinator, JobCancellation};
use crate::classify::SourceKind;
use crate::config::{Config, DEFAULT_MAX_FILE_SIZE_BYTES};
use crate::engine::EngineDriver;
use crate::extract::{ExtractError, ExtractorSet};
use crate::handoff::{CompletionHandoff, Notification, Notifier, UploadSink};
use crate::job::{Job, JobId, JobRepository, JobState, StoreError};
use crate::retry::{CancelSignal, RetryOutcome, RetryPolicy, RetryableError, run_with_retry};

/// No extractor can handle the locator.
#[derive(Debug, Clone, Error)]
#[error("classification error: no extractor accepts '{locator}'")]
pub struct ClassificationError {
    pub locator: String,
}

/// The declared size is above the per-file ceiling.
#[derive(Debug, Clone, Error)]
#[error("declared size of {declared_size} bytes exceeds the {limit} byte limit")]
pub struct SizeLimitExceeded {
    pub declared_size: u64,
    pub limit: u64,
}

/// Tunables for the scheduler loop.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_file_size_bytes: u64,
    pub poll_interval: Duration,
    pub idle_interval: Duration,
    /// Consecutive failed engine status calls tolerated per attempt.
    pub max_poll_errors: u32,
    pub classify_policy: RetryPolicy,
    pub extract_policy: RetryPolicy,
    pub download_policy: RetryPolicy,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            poll_interval: Duration::from_secs(2),
            idle_interval: Duration::from_secs(1),
            max_poll_errors: 5,
            classify_policy: RetryPolicy::default(),
            extract_policy: RetryPolicy::default(),
            download_policy: RetryPolicy::default(),
        }
    }
}

impl SchedulerSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_file_size_bytes: config.download.max_file_size_bytes,
            poll_interval: config.poll_interval(),
            idle_interval: config.idle_interval(),
            max_poll_errors: config.engine.max_poll_errors.max(1),
            classify_policy: config.retry.classify_policy(),
            extract_policy: config.retry.extract_policy(),
            download_policy: config.retry.download_policy(),
        }
    }
}

/// How a processed job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(PathBuf),
    Failed(String),
    Cancelled,
    SkippedTooLarge { declared_size: u64 },
}

impl JobOutcome {
    /// The terminal state this outcome was stored as.
    #[must_use]
    pub fn state(&self) -> JobState {
        match self {
            Self::Completed(_) => JobState::Completed,
            Self::Failed(_) => JobState::Failed,
            Self::Cancelled => JobState::Cancelled,
            Self::SkippedTooLarge { .. } => JobState::SkippedTooLarge,
        }
    }
}

enum Stage<T> {
    Proceed(T),
    Finished(JobOutcome),
}

/// The one job the scheduler is working on, if any.
#[derive(Debug, Default)]
struct ActiveSlot(RwLock<Option<JobId>>);

impl ActiveSlot {
    fn get(&self) -> Option<JobId> {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn occupy(&self, job_id: JobId) -> SlotGuard<'_> {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(job_id);
        SlotGuard { slot: self }
    }
}

/// Empties the slot when the job ends, including when the job future is
/// dropped on shutdown.
struct SlotGuard<'a> {
    slot: &'a ActiveSlot,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        *self.slot.0.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Pulls Pending jobs one at a time and drives them to a terminal state.
pub struct Scheduler {
    store: Arc<dyn JobRepository>,
    extractors: ExtractorSet,
    driver: EngineDriver,
    cancellation: Arc<CancellationCoordinator>,
    uploads: Arc<dyn UploadSink>,
    notifier: Arc<dyn Notifier>,
    settings: SchedulerSettings,
    slot: ActiveSlot,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("current_job_id", &self.current_job_id())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new(
        store: Arc<dyn JobRepository>,
        extractors: ExtractorSet,
        driver: EngineDriver,
        cancellation: Arc<CancellationCoordinator>,
        uploads: Arc<dyn UploadSink>,
        notifier: Arc<dyn Notifier>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            extractors,
            driver,
            cancellation,
            uploads,
            notifier,
            settings,
            slot: ActiveSlot::default(),
        }
    }

    /// Job currently being processed.
    #[must_use]
    pub fn current_job_id(&self) -> Option<JobId> {
        self.slot.get()
    }

    /// Returns jobs interrupted mid-flight by a previous run to Pending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be updated.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<u64, StoreError> {
        let requeued = self.store.requeue_interrupted().await?;
        if requeued > 0 {
            info!(requeued, "re-enqueued interrupted jobs");
        }
        Ok(requeued)
    }

    /// Recovers, then processes jobs until `shutdown` fires.
    ///
    /// A job still running at shutdown is abandoned where it stands and
    /// recovered on the next start.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only if startup recovery fails; later store
    /// errors are logged and the loop continues.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), StoreError> {
        self.recover().await?;
        info!("scheduler started");

        while !shutdown.is_cancelled() {
            let processed = tokio::select! {
                () = shutdown.cancelled() => break,
                result = self.process_next() => match result {
                    Ok(processed) => processed.is_some(),
                    Err(err) => {
                        error!(error = %err, "store error while processing job");
                        false
                    }
                },
            };
            if processed {
                continue;
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(self.settings.idle_interval) => {}
            }
        }

        info!("scheduler stopped");
        Ok(())
    }

    /// Takes the oldest Pending job and drives it to a terminal state.
    ///
    /// Returns `None` when nothing is pending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails while the job is processed.
    /// The job is then marked Failed when the store still accepts writes.
    pub async fn process_next(&self) -> Result<Option<(JobId, JobOutcome)>, StoreError> {
        let Some(job) = self.store.next_pending().await? else {
            return Ok(None);
        };
        let job_id = job.id;
        let _slot = self.slot.occupy(job_id);
        let cancel = self.cancellation.for_job(job_id);

        let result = self.drive(&job, &cancel).await;
        self.cancellation.release(job_id);

        match result {
            Ok(outcome) => {
                info!(job_id, state = %outcome.state(), "job finished");
                Ok(Some((job_id, outcome)))
            }
            Err(err) => {
                self.fail_after_store_error(&job, &err).await;
                Err(err)
            }
        }
    }

    #[instrument(skip(self, job, cancel), fields(job_id = job.id))]
    async fn drive(&self, job: &Job, cancel: &JobCancellation) -> Result<JobOutcome, StoreError> {
        let id = job.id;
        if cancel.is_cancelled().await {
            self.store.mark_cancelled(id, "cancelled before start").await?;
            return Ok(JobOutcome::Cancelled);
        }

        // Classifying. A kind stored by an interrupted run is final.
        self.store.enter_stage(id, JobState::Classifying).await?;
        let kind = if let Some(kind) = job.kind() {
            debug!(kind = %kind, "reusing stored kind");
            kind
        } else {
            let kind = match self
                .run_stage(
                    job,
                    JobState::Classifying,
                    &self.settings.classify_policy,
                    cancel,
                    |_| unless_cancelled(cancel, self.extractors.probe_kind(&job.locator)),
                )
                .await?
            {
                Stage::Proceed(kind) => kind,
                Stage::Finished(outcome) => return Ok(outcome),
            };
            self.store.set_kind(id, kind).await?;
            kind
        };
        if kind == SourceKind::Unknown {
            let error = ClassificationError {
                locator: job.locator.clone(),
            };
            return self.fail(job, &error.to_string(), 0).await;
        }
        info!(kind = %kind, "classified");

        // Extracting
        self.store.enter_stage(id, JobState::Extracting).await?;
        let resource = match self
            .run_stage(
                job,
                JobState::Extracting,
                &self.settings.extract_policy,
                cancel,
                |_| unless_cancelled(cancel, self.extractors.extract(kind, &job.locator, id)),
            )
            .await?
        {
            Stage::Proceed(resource) => resource,
            Stage::Finished(outcome) => return Ok(outcome),
        };
        self.store.set_resource(id, &resource).await?;
        debug!(url = %resource.url, title = %resource.title, "resource extracted");

        // SizeCheck
        self.store.enter_stage(id, JobState::SizeCheck).await?;
        if cancel.is_cancelled().await {
            return self.cancelled(id, JobState::SizeCheck).await;
        }
        if let Some(declared_size) = resource.declared_size {
            let limit = self.settings.max_file_size_bytes;
            if declared_size > limit {
                return self.skip_too_large(job, declared_size, limit).await;
            }
        }

        // Downloading
        self.store.enter_stage(id, JobState::Downloading).await?;
        let bytes_floor = AtomicU64::new(0);
        let ctx = AttemptContext {
            driver: &self.driver,
            store: self.store.as_ref(),
            cancel,
            job_id: id,
            resource: &resource,
            poll_interval: self.settings.poll_interval,
            max_poll_errors: self.settings.max_poll_errors,
            bytes_floor: &bytes_floor,
        };
        let path = match self
            .run_stage(
                job,
                JobState::Downloading,
                &self.settings.download_policy,
                cancel,
                |attempt| run_attempt(&ctx, attempt),
            )
            .await?
        {
            Stage::Proceed(path) => path,
            Stage::Finished(outcome) => return Ok(outcome),
        };

        let file_path = path.display().to_string();
        self.store.mark_completed(id, &file_path).await?;
        info!(path = %file_path, "download completed");
        self.uploads
            .deliver(CompletionHandoff {
                job_id: id,
                file_path: path.clone(),
                declared_title: resource.title.clone(),
            })
            .await;
        Ok(JobOutcome::Completed(path))
    }

    /// Runs one stage under `policy`, persisting the failure count after
    /// every failed attempt.
    async fn run_stage<T, E, Op, Fut>(
        &self,
        job: &Job,
        state: JobState,
        policy: &RetryPolicy,
        cancel: &JobCancellation,
        operation: Op,
    ) -> Result<Stage<T>, StoreError>
    where
        E: RetryableError,
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let id = job.id;
        let store = &self.store;
        let outcome = run_with_retry(policy, cancel, operation, |failures| async move {
            if let Err(err) = store.set_retry_count(id, failures).await {
                warn!(job_id = id, error = %err, "failed to persist retry count");
            }
        })
        .await;

        match outcome {
            RetryOutcome::Succeeded { value, attempts } => {
                debug!(state = %state, attempts, "stage succeeded");
                Ok(Stage::Proceed(value))
            }
            RetryOutcome::Failed { error, attempts } => self
                .fail(job, &error.to_string(), attempts)
                .await
                .map(Stage::Finished),
            RetryOutcome::Cancelled { attempts } => {
                debug!(state = %state, attempts, "stage cancelled");
                self.cancelled(id, state).await.map(Stage::Finished)
            }
        }
    }

    async fn fail(
        &self,
        job: &Job,
        error: &str,
        retry_count: u32,
    ) -> Result<JobOutcome, StoreError> {
        self.store.mark_failed(job.id, error, retry_count).await?;
        warn!(job_id = job.id, retry_count, error, "job failed");
        self.notifier
            .notify(Notification::Failed {
                job_id: job.id,
                locator: job.locator.clone(),
                error: error.to_string(),
            })
            .await;
        Ok(JobOutcome::Failed(error.to_string()))
    }

    async fn cancelled(&self, id: JobId, state: JobState) -> Result<JobOutcome, StoreError> {
        self.store
            .mark_cancelled(id, &format!("cancelled during {state}"))
            .await?;
        Ok(JobOutcome::Cancelled)
    }

    async fn skip_too_large(
        &self,
        job: &Job,
        declared_size: u64,
        limit: u64,
    ) -> Result<JobOutcome, StoreError> {
        let reason = SizeLimitExceeded {
            declared_size,
            limit,
        };
        self.store.mark_skipped(job.id, &reason.to_string()).await?;
        info!(job_id = job.id, declared_size, limit, "skipped: too large");
        self.notifier
            .notify(Notification::SkippedTooLarge {
                job_id: job.id,
                locator: job.locator.clone(),
                declared_size,
                limit,
            })
            .await;
        Ok(JobOutcome::SkippedTooLarge { declared_size })
    }

    async fn fail_after_store_error(&self, job: &Job, err: &StoreError) {
        let message = format!("store error: {err}");
        match self.store.mark_failed(job.id, &message, 0).await {
            Ok(()) => {
                self.notifier
                    .notify(Notification::Failed {
                        job_id: job.id,
                        locator: job.locator.clone(),
                        error: message,
                    })
                    .await;
            }
            Err(mark_err) => {
                error!(job_id = job.id, error = %mark_err, "could not mark job failed");
            }
        }
    }
}

/// Runs extractor work until it returns or the job is cancelled.
async fn unless_cancelled<T>(
    cancel: &JobCancellation,
    work: impl Future<Output = Result<T, ExtractError>>,
) -> Result<T, ExtractError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ExtractError::Cancelled),
        result = work => result,
    }
}
