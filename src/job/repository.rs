//! Repository seam for job persistence.
//!
//! The scheduler, cancellation coordinator and service depend on this trait
//! rather than on [`JobStore`] directly, so any store honoring the contract
//! (create, read, update by id, list by state, no deletion) can back them.

use async_trait::async_trait;

use super::{Job, JobId, JobState, JobStore, JobSummary, Progress, ResourceDescriptor, Result};
use crate::classify::SourceKind;

/// Data-access contract for job reads and writes.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Inserts a Pending job.
    async fn enqueue(&self, locator: &str) -> Result<JobId>;

    /// Reads one job by id.
    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Returns the oldest Pending job.
    async fn next_pending(&self) -> Result<Option<Job>>;

    /// Lists jobs in a state, oldest first.
    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>>;

    /// Lists every job, oldest first.
    async fn list_all(&self) -> Result<Vec<Job>>;

    /// Returns the job in an active state, if any.
    async fn list_active(&self) -> Result<Option<Job>>;

    /// Counts jobs per state.
    async fn summary(&self) -> Result<JobSummary>;

    /// Enters a processing stage, resetting the retry counter.
    async fn enter_stage(&self, id: JobId, state: JobState) -> Result<()>;

    /// Records the kind once.
    async fn set_kind(&self, id: JobId, kind: SourceKind) -> Result<()>;

    /// Stores the extracted descriptor.
    async fn set_resource(&self, id: JobId, resource: &ResourceDescriptor) -> Result<()>;

    /// Records the failed-attempt count for the current stage.
    async fn set_retry_count(&self, id: JobId, retry_count: u32) -> Result<()>;

    /// Persists progress; returns false when the write was refused.
    async fn update_progress(&self, id: JobId, progress: &Progress) -> Result<bool>;

    /// Marks the job completed.
    async fn mark_completed(&self, id: JobId, file_path: &str) -> Result<()>;

    /// Marks the job failed.
    async fn mark_failed(&self, id: JobId, error: &str, retry_count: u32) -> Result<()>;

    /// Marks the job cancelled.
    async fn mark_cancelled(&self, id: JobId, reason: &str) -> Result<()>;

    /// Marks the job skipped for size.
    async fn mark_skipped(&self, id: JobId, reason: &str) -> Result<()>;

    /// Sets the persistent cancellation flag.
    async fn request_cancel(&self, id: JobId) -> Result<()>;

    /// Reads the persistent cancellation flag.
    async fn is_cancel_requested(&self, id: JobId) -> Result<bool>;

    /// Re-enqueues interrupted jobs as Pending.
    async fn requeue_interrupted(&self) -> Result<u64>;
}

#[async_trait]
impl JobRepository for JobStore {
    async fn enqueue(&self, locator: &str) -> Result<JobId> {
        JobStore::enqueue(self, locator).await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        JobStore::get(self, id).await
    }

    async fn next_pending(&self) -> Result<Option<Job>> {
        JobStore::next_pending(self).await
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        JobStore::list_by_state(self, state).await
    }

    async fn list_all(&self) -> Result<Vec<Job>> {
        JobStore::list_all(self).await
    }

    async fn list_active(&self) -> Result<Option<Job>> {
        JobStore::list_active(self).await
    }

    async fn summary(&self) -> Result<JobSummary> {
        JobStore::summary(self).await
    }

    async fn enter_stage(&self, id: JobId, state: JobState) -> Result<()> {
        JobStore::enter_stage(self, id, state).await
    }

    async fn set_kind(&self, id: JobId, kind: SourceKind) -> Result<()> {
        JobStore::set_kind(self, id, kind).await
    }

    async fn set_resource(&self, id: JobId, resource: &ResourceDescriptor) -> Result<()> {
        JobStore::set_resource(self, id, resource).await
    }

    async fn set_retry_count(&self, id: JobId, retry_count: u32) -> Result<()> {
        JobStore::set_retry_count(self, id, retry_count).await
    }

    async fn update_progress(&self, id: JobId, progress: &Progress) -> Result<bool> {
        JobStore::update_progress(self, id, progress).await
    }

    async fn mark_completed(&self, id: JobId, file_path: &str) -> Result<()> {
        JobStore::mark_completed(self, id, file_path).await
    }

    async fn mark_failed(&self, id: JobId, error: &str, retry_count: u32) -> Result<()> {
        JobStore::mark_failed(self, id, error, retry_count).await
    }

    async fn mark_cancelled(&self, id: JobId, reason: &str) -> Result<()> {
        JobStore::mark_cancelled(self, id, reason).await
    }

    async fn mark_skipped(&self, id: JobId, reason: &str) -> Result<()> {
        JobStore::mark_skipped(self, id, reason).await
    }

    async fn request_cancel(&self, id: JobId) -> Result<()> {
        JobStore::request_cancel(self, id).await
    }

    async fn is_cancel_requested(&self, id: JobId) -> Result<bool> {
        JobStore::is_cancel_requested(self, id).await
    }

    async fn requeue_interrupted(&self) -> Result<u64> {
        JobStore::requeue_interrupted(self).await
    }
}
