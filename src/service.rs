//! Submission, query and cancellation surface used by front ends.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use crate::cancel::CancellationCoordinator;
use crate::classify::MAX_LOCATOR_LENGTH;
use crate::job::{Job, JobId, JobRepository, JobState, JobSummary, StoreError};

/// Errors returned by [`JobService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The locator is empty or too long to be a URL.
    #[error("invalid locator: {reason}")]
    InvalidLocator { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Front-end API over the job store and the cancellation coordinator.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobRepository>,
    cancellation: Arc<CancellationCoordinator>,
}

impl std::fmt::Debug for JobService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobService")
            .field("cancellation", &self.cancellation)
            .finish_non_exhaustive()
    }
}

impl JobService {
    #[must_use]
    pub fn new(store: Arc<dyn JobRepository>, cancellation: Arc<CancellationCoordinator>) -> Self {
        Self {
            store,
            cancellation,
        }
    }

    /// Records `locator` as a Pending job and returns immediately.
    ///
    /// Surrounding whitespace is dropped. Classification happens later, in
    /// the scheduler, so any non-empty locator is accepted here.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidLocator`] for an empty or oversized
    /// locator, or [`ServiceError::Store`] if the insert fails.
    #[instrument(skip(self, locator))]
    pub async fn enqueue(&self, locator: &str) -> Result<JobId, ServiceError> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(ServiceError::InvalidLocator {
                reason: "locator is empty".to_string(),
            });
        }
        if locator.len() > MAX_LOCATOR_LENGTH {
            return Err(ServiceError::InvalidLocator {
                reason: format!(
                    "locator is {} characters; the limit is {MAX_LOCATOR_LENGTH}",
                    locator.len()
                ),
            });
        }
        let job_id = self.store.enqueue(locator).await?;
        info!(job_id, "job enqueued");
        Ok(job_id)
    }

    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] with `JobNotFound` for an unknown id.
    pub async fn get_job(&self, job_id: JobId) -> Result<Job, ServiceError> {
        self.store
            .get(job_id)
            .await?
            .ok_or(ServiceError::Store(StoreError::JobNotFound(job_id)))
    }

    /// The job in an active state, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if the query fails.
    pub async fn list_active(&self) -> Result<Option<Job>, ServiceError> {
        Ok(self.store.list_active().await?)
    }

    /// Pending jobs, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if the query fails.
    pub async fn list_pending(&self) -> Result<Vec<Job>, ServiceError> {
        Ok(self.store.list_by_state(JobState::Pending).await?)
    }

    /// Every job, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if the query fails.
    pub async fn list_all(&self) -> Result<Vec<Job>, ServiceError> {
        Ok(self.store.list_all().await?)
    }

    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if the query fails.
    pub async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, ServiceError> {
        Ok(self.store.list_by_state(state).await?)
    }

    /// Requests cancellation. Idempotent; a finished job is left as it is.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] with `JobNotFound` for an unknown id.
    #[instrument(skip(self))]
    pub async fn request_cancel(&self, job_id: JobId) -> Result<(), ServiceError> {
        self.cancellation.request_cancel(job_id).await?;
        Ok(())
    }

    /// Job counts per state.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if the query fails.
    pub async fn summary(&self) -> Result<JobSummary, ServiceError> {
        Ok(self.store.summary().await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::Database;
    use crate::job::JobStore;

    async fn service() -> JobService {
        let db = Database::new_in_memory().await.unwrap();
        let store: Arc<dyn JobRepository> = Arc::new(JobStore::new(db));
        let cancellation = Arc::new(CancellationCoordinator::new(
            Arc::clone(&store),
            Duration::from_millis(20),
        ));
        JobService::new(store, cancellation)
    }

    #[tokio::test]
    async fn test_enqueue_trims_and_stores_pending() {
        let service = service().await;
        let id = service
            .enqueue("  https://example.com/a.zip \n")
            .await
            .unwrap();
        let job = service.get_job(id).await.unwrap();
        assert_eq!(job.locator, "https://example.com/a.zip");
        assert_eq!(job.state(), JobState::Pending);
        assert_eq!(job.kind(), None);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_empty_and_oversized() {
        let service = service().await;
        let err = service.enqueue("   ").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidLocator { .. }));
        let long = format!("https://example.com/{}", "a".repeat(MAX_LOCATOR_LENGTH));
        let err = service.enqueue(&long).await.unwrap_err();
        assert!(err.to_string().contains("limit"));
    }

    #[tokio::test]
    async fn test_list_pending_is_fifo() {
        let service = service().await;
        let first = service.enqueue("magnet:?xt=urn:btih:a").await.unwrap();
        let second = service.enqueue("https://example.com/b").await.unwrap();
        let pending: Vec<JobId> = service
            .list_pending()
            .await
            .unwrap()
            .iter()
            .map(|job| job.id)
            .collect();
        assert_eq!(pending, vec![first, second]);
        assert!(service.list_active().await.unwrap().is_none());
        assert_eq!(service.summary().await.unwrap().count(JobState::Pending), 2);
    }

    #[tokio::test]
    async fn test_get_and_cancel_unknown_job() {
        let service = service().await;
        let err = service.get_job(99).await.unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::JobNotFound(99))));
        let err = service.request_cancel(99).await.unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::JobNotFound(99))));
    }

    #[tokio::test]
    async fn test_request_cancel_sets_flag() {
        let service = service().await;
        let id = service.enqueue("https://example.com/c").await.unwrap();
        service.request_cancel(id).await.unwrap();
        service.request_cancel(id).await.unwrap();
        assert!(service.get_job(id).await.unwrap().cancel_requested);
    }
}
