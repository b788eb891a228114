//! Job persistence.
//!
//! `SQLite`-backed storage for download jobs moving through their lifecycle
//! (pending → classifying → extracting → `size_check` → downloading → terminal).
//!
//! # Overview
//!
//! - [`JobStore`] - Main interface for job reads and writes
//! - [`Job`] - One persisted job row
//! - [`JobState`] - Lifecycle states
//! - [`ResourceDescriptor`] - What extraction hands to the engine
//! - [`StoreError`] - Operation error types
//!
//! # Example
//!
//! ```ignore
//! use smartdl_core::job::{JobStore, JobState};
//! use smartdl_core::Database;
//! use std::path::Path;
//!
//! let db = Database::new(Path::new("smartdl.db")).await?;
//! let store = JobStore::new(db);
//!
//! let id = store.enqueue("magnet:?xt=urn:btih:abc").await?;
//! if let Some(job) = store.next_pending().await? {
//!     store.enter_stage(job.id, JobState::Classifying).await?;
//! }
//! ```

mod error;
mod item;
mod repository;
mod resource;

pub use error::StoreError;
pub use item::{Job, JobId, JobState, Progress};
pub use repository::JobRepository;
pub use resource::{Cookie, ResourceDescriptor};

use serde::Serialize;
use sqlx::Row;
use tracing::instrument;

use crate::classify::SourceKind;
use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Returns `Ok(())` if at least one row was affected; otherwise [`StoreError::JobNotFound`].
fn check_affected(id: JobId, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::JobNotFound(id))
    } else {
        Ok(())
    }
}

/// `SQLite` stores integers signed; counters beyond `i64::MAX` saturate.
fn to_db_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Count of jobs per lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    /// One entry per state, in lifecycle order, zero counts included.
    pub counts: Vec<(JobState, i64)>,
}

impl JobSummary {
    /// Number of jobs currently in `state`.
    #[must_use]
    pub fn count(&self, state: JobState) -> i64 {
        self.counts
            .iter()
            .find(|(candidate, _)| *candidate == state)
            .map_or(0, |(_, count)| *count)
    }

    /// Total number of jobs ever submitted.
    #[must_use]
    pub fn total(&self) -> i64 {
        self.counts.iter().map(|(_, count)| count).sum()
    }
}

/// Job store backed by the `jobs` table.
#[derive(Debug, Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    /// Creates a store over the given database connection.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a new Pending job for `locator` and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    #[instrument(skip(self), fields(locator = %locator))]
    pub async fn enqueue(&self, locator: &str) -> Result<JobId> {
        let row = sqlx::query(
            r"INSERT INTO jobs (locator, state)
              VALUES (?, ?)
              RETURNING id",
        )
        .bind(locator)
        .bind(JobState::Pending.as_str())
        .fetch_one(self.db.pool())
        .await?;

        Ok(row.get("id"))
    }

    /// Gets a job by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(r"SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(job)
    }

    /// Returns the oldest Pending job without claiming it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn next_pending(&self) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r"SELECT * FROM jobs
              WHERE state = ?
              ORDER BY created_at ASC, id ASC
              LIMIT 1",
        )
        .bind(JobState::Pending.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        Ok(job)
    }

    /// Lists jobs in `state`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(state = %state))]
    pub async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r"SELECT * FROM jobs
              WHERE state = ?
              ORDER BY created_at ASC, id ASC",
        )
        .bind(state.as_str())
        .fetch_all(self.db.pool())
        .await?;

        Ok(jobs)
    }

    /// Lists every job, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(r"SELECT * FROM jobs ORDER BY created_at ASC, id ASC")
            .fetch_all(self.db.pool())
            .await?;

        Ok(jobs)
    }

    /// Returns the job currently owned by the scheduler, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_active(&self) -> Result<Option<Job>> {
        let [a, b, c, d] = JobState::ACTIVE;
        let job = sqlx::query_as::<_, Job>(
            r"SELECT * FROM jobs
              WHERE state IN (?, ?, ?, ?)
              ORDER BY updated_at DESC, id DESC
              LIMIT 1",
        )
        .bind(a.as_str())
        .bind(b.as_str())
        .bind(c.as_str())
        .bind(d.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        Ok(job)
    }

    /// Counts jobs per state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn summary(&self) -> Result<JobSummary> {
        let rows = sqlx::query(r"SELECT state, COUNT(*) AS count FROM jobs GROUP BY state")
            .fetch_all(self.db.pool())
            .await?;

        let mut counts: Vec<(JobState, i64)> =
            JobState::ALL.iter().map(|state| (*state, 0)).collect();
        for row in rows {
            let state: String = row.get("state");
            let count: i64 = row.get("count");
            let Ok(state) = state.parse::<JobState>() else {
                continue;
            };
            if let Some(entry) = counts.iter_mut().find(|(s, _)| *s == state) {
                entry.1 = count;
            }
        }

        Ok(JobSummary { counts })
    }

    /// Moves a job into a processing stage and resets its stage retry counter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] if no job exists with the given id.
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self), fields(state = %state))]
    pub async fn enter_stage(&self, id: JobId, state: JobState) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE jobs
              SET state = ?,
                  retry_count = 0,
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ?",
        )
        .bind(state.as_str())
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Records the job's kind. A kind already stored is never overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] if no job exists with the given id.
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn set_kind(&self, id: JobId, kind: SourceKind) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE jobs
              SET kind = COALESCE(kind, ?),
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ?",
        )
        .bind(kind.as_str())
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Stores the descriptor produced by a successful extraction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Encode`] if the descriptor cannot be serialized,
    /// [`StoreError::JobNotFound`] if no job exists with the given id,
    /// or [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, resource), fields(url = %resource.url))]
    pub async fn set_resource(&self, id: JobId, resource: &ResourceDescriptor) -> Result<()> {
        let json = serde_json::to_string(resource)?;
        let result = sqlx::query(
            r"UPDATE jobs
              SET resource = ?,
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ?",
        )
        .bind(json)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Records the failed-attempt count for the current stage.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] if no job exists with the given id.
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn set_retry_count(&self, id: JobId, retry_count: u32) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE jobs
              SET retry_count = ?,
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ?",
        )
        .bind(i64::from(retry_count))
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Persists a progress snapshot.
    ///
    /// The write only lands while the job is Downloading and no cancellation
    /// has been requested; returns whether it did.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, progress), fields(bytes = progress.bytes_downloaded))]
    pub async fn update_progress(&self, id: JobId, progress: &Progress) -> Result<bool> {
        let result = sqlx::query(
            r"UPDATE jobs
              SET percent = ?,
                  bytes_downloaded = ?,
                  bytes_total = ?,
                  speed_bytes_per_sec = ?,
                  eta_seconds = ?,
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ? AND state = ? AND cancel_requested = 0",
        )
        .bind(progress.percent)
        .bind(to_db_int(progress.bytes_downloaded))
        .bind(progress.bytes_total.map(to_db_int))
        .bind(to_db_int(progress.speed_bytes_per_sec))
        .bind(progress.eta_seconds.map(to_db_int))
        .bind(id)
        .bind(JobState::Downloading.as_str())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Marks a job completed with the location of the downloaded file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] if no job exists with the given id.
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self), fields(file_path = %file_path))]
    pub async fn mark_completed(&self, id: JobId, file_path: &str) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE jobs
              SET state = ?,
                  file_path = COALESCE(file_path, ?),
                  percent = 100,
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ?",
        )
        .bind(JobState::Completed.as_str())
        .bind(file_path)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Marks a job failed with the last error and the attempts consumed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] if no job exists with the given id.
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self), fields(error = %error, retry_count))]
    pub async fn mark_failed(&self, id: JobId, error: &str, retry_count: u32) -> Result<()> {
        self.finish(id, JobState::Failed, error, Some(retry_count))
            .await
    }

    /// Marks a job cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] if no job exists with the given id.
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self), fields(reason = %reason))]
    pub async fn mark_cancelled(&self, id: JobId, reason: &str) -> Result<()> {
        self.finish(id, JobState::Cancelled, reason, None).await
    }

    /// Marks a job skipped because its declared size exceeds the ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] if no job exists with the given id.
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self), fields(reason = %reason))]
    pub async fn mark_skipped(&self, id: JobId, reason: &str) -> Result<()> {
        self.finish(id, JobState::SkippedTooLarge, reason, None)
            .await
    }

    async fn finish(
        &self,
        id: JobId,
        state: JobState,
        error: &str,
        retry_count: Option<u32>,
    ) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE jobs
              SET state = ?,
                  error = ?,
                  retry_count = COALESCE(?, retry_count),
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ?",
        )
        .bind(state.as_str())
        .bind(error)
        .bind(retry_count.map(i64::from))
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Sets the persistent cancellation flag. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] if no job exists with the given id.
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn request_cancel(&self, id: JobId) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE jobs
              SET cancel_requested = 1,
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ?",
        )
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Reads the persistent cancellation flag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] if no job exists with the given id.
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn is_cancel_requested(&self, id: JobId) -> Result<bool> {
        let row = sqlx::query(r"SELECT cancel_requested FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        row.map(|row| row.get::<bool, _>("cancel_requested"))
            .ok_or(StoreError::JobNotFound(id))
    }

    /// Returns every job interrupted mid-stage to Pending.
    ///
    /// Called once at scheduler start. Retry counters, progress and the
    /// resolved resource are cleared so the job restarts from classification;
    /// its kind, if already recorded, stays.
    ///
    /// # Returns
    ///
    /// The number of jobs re-enqueued.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn requeue_interrupted(&self) -> Result<u64> {
        let [a, b, c, d] = JobState::ACTIVE;
        let result = sqlx::query(
            r"UPDATE jobs
              SET state = ?,
                  retry_count = 0,
                  resource = NULL,
                  percent = 0,
                  bytes_downloaded = 0,
                  bytes_total = NULL,
                  speed_bytes_per_sec = 0,
                  eta_seconds = NULL,
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE state IN (?, ?, ?, ?)",
        )
        .bind(JobState::Pending.as_str())
        .bind(a.as_str())
        .bind(b.as_str())
        .bind(c.as_str())
        .bind(d.as_str())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }
}
