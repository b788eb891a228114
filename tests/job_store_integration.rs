//! Integration tests for the job store.
//!
//! These tests verify job persistence against a real, file-backed SQLite
//! database, including reopening it as a restarted process would.

use std::sync::Arc;
use std::time::Duration;

use smartdl_core::{
    CancellationCoordinator, Database, JobRepository, JobService, JobState, JobStore, Progress,
    ResourceDescriptor, ServiceError, SourceKind, StoreError,
};
use tempfile::TempDir;

/// Helper to create a test database with migrations applied.
async fn setup_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("jobs.db");

    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");

    (db, temp_dir)
}

async fn reopen(temp_dir: &TempDir) -> JobStore {
    let db = Database::new(&temp_dir.path().join("jobs.db"))
        .await
        .expect("Failed to reopen database");
    JobStore::new(db)
}

// ==================== Durability ====================

#[tokio::test]
async fn test_jobs_survive_reopen() {
    let (db, temp_dir) = setup_test_db().await;
    let store = JobStore::new(db.clone());

    let id = store
        .enqueue("https://example.com/video")
        .await
        .expect("Failed to enqueue");
    store.enter_stage(id, JobState::Extracting).await.expect("stage");
    store.set_kind(id, SourceKind::StreamSite).await.expect("kind");
    let mut resource = ResourceDescriptor::new("https://cdn.example.com/v.mp4", "A Video");
    resource.declared_size = Some(1_234);
    resource
        .headers
        .insert("Referer".to_string(), "https://example.com/video".to_string());
    store.set_resource(id, &resource).await.expect("resource");
    drop(store);
    db.close().await;

    let store = reopen(&temp_dir).await;
    let job = store.get(id).await.expect("get").expect("job persisted");
    assert_eq!(job.state(), JobState::Extracting);
    assert_eq!(job.kind(), Some(SourceKind::StreamSite));
    assert_eq!(job.resource(), Some(resource));
}

#[tokio::test]
async fn test_restart_requeues_interrupted_job_and_keeps_kind() {
    let (db, temp_dir) = setup_test_db().await;
    let store = JobStore::new(db.clone());

    let interrupted = store.enqueue("magnet:?xt=urn:btih:abc").await.expect("enqueue");
    store.set_kind(interrupted, SourceKind::Torrent).await.expect("kind");
    store
        .enter_stage(interrupted, JobState::Downloading)
        .await
        .expect("stage");
    store.set_retry_count(interrupted, 1).await.expect("retry");
    let written = store
        .update_progress(interrupted, &Progress::from_counters(500, Some(1_000), 50))
        .await
        .expect("progress");
    assert!(written);

    let finished = store.enqueue("https://example.com/a.zip").await.expect("enqueue");
    store
        .mark_failed(finished, "download failed: boom", 3)
        .await
        .expect("fail");
    drop(store);
    db.close().await;

    let store = reopen(&temp_dir).await;
    assert_eq!(store.requeue_interrupted().await.expect("requeue"), 1);

    let job = store.get(interrupted).await.unwrap().unwrap();
    assert_eq!(job.state(), JobState::Pending);
    assert_eq!(job.kind(), Some(SourceKind::Torrent));
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.bytes_downloaded, 0);
    assert!(job.resource().is_none());

    let job = store.get(finished).await.unwrap().unwrap();
    assert_eq!(job.state(), JobState::Failed, "terminal jobs stay put");
    assert_eq!(job.retry_count, 3);

    assert_eq!(
        store.next_pending().await.unwrap().map(|job| job.id),
        Some(interrupted)
    );
}

#[tokio::test]
async fn test_terminal_job_keeps_cancel_flag_and_error() {
    let (db, _temp_dir) = setup_test_db().await;
    let store = JobStore::new(db);

    let id = store.enqueue("https://example.com/a.zip").await.expect("enqueue");
    store.enter_stage(id, JobState::Downloading).await.unwrap();
    store.request_cancel(id).await.unwrap();
    store
        .mark_cancelled(id, "cancelled during downloading")
        .await
        .unwrap();

    let job = store.get(id).await.unwrap().unwrap();
    assert_eq!(job.state(), JobState::Cancelled);
    assert!(job.cancel_requested);
    assert_eq!(job.error.as_deref(), Some("cancelled during downloading"));
    assert!(store.is_cancel_requested(id).await.unwrap());
}

// ==================== Concurrent access ====================

#[tokio::test]
async fn test_reads_proceed_while_progress_is_written() {
    let (db, _temp_dir) = setup_test_db().await;
    let store = Arc::new(JobStore::new(db));

    let id = store.enqueue("https://example.com/big.iso").await.unwrap();
    store.enter_stage(id, JobState::Downloading).await.unwrap();

    let writer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for step in 1..=50_u64 {
                let progress = Progress::from_counters(step * 1_000, Some(50_000), 1_000);
                assert!(store.update_progress(id, &progress).await.unwrap());
            }
        })
    };

    let mut last_seen = 0;
    for _ in 0..50 {
        let job = store.get(id).await.unwrap().unwrap();
        assert!(job.bytes_downloaded >= last_seen, "readers never see bytes go back");
        last_seen = job.bytes_downloaded;
        let summary = store.summary().await.unwrap();
        assert_eq!(summary.count(JobState::Downloading), 1);
    }
    writer.await.expect("writer task");

    let job = store.get(id).await.unwrap().unwrap();
    assert_eq!(job.bytes_downloaded, 50_000);
    assert!((job.percent - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_two_connections_share_one_queue() {
    let (db, temp_dir) = setup_test_db().await;
    let submitter = JobStore::new(db);
    let scheduler_side = reopen(&temp_dir).await;

    let id = submitter.enqueue("https://example.com/a.zip").await.unwrap();
    let pending = scheduler_side.next_pending().await.unwrap().expect("visible");
    assert_eq!(pending.id, id);

    scheduler_side
        .enter_stage(id, JobState::Classifying)
        .await
        .unwrap();
    let active = submitter.list_active().await.unwrap().expect("active job");
    assert_eq!(active.id, id);
    assert_eq!(active.state(), JobState::Classifying);
}

// ==================== Service over a file-backed store ====================

#[tokio::test]
async fn test_service_cancel_flows_to_store() {
    let (db, _temp_dir) = setup_test_db().await;
    let store: Arc<dyn JobRepository> = Arc::new(JobStore::new(db));
    let cancellation = Arc::new(CancellationCoordinator::new(
        Arc::clone(&store),
        Duration::from_millis(50),
    ));
    let service = JobService::new(Arc::clone(&store), Arc::clone(&cancellation));

    let id = service
        .enqueue("  https://example.com/a.zip  ")
        .await
        .expect("enqueue");
    service.request_cancel(id).await.expect("cancel");

    let job = service.get_job(id).await.expect("job");
    assert_eq!(job.locator, "https://example.com/a.zip");
    assert!(job.cancel_requested);
    assert!(cancellation.is_cancel_requested(id).await);
    assert_eq!(service.list_pending().await.unwrap().len(), 1);

    let err = service.request_cancel(id + 100).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Store(StoreError::JobNotFound(missing)) if missing == id + 100
    ));
}
