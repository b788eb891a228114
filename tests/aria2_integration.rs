//! Integration tests for the engine driver over the aria2 JSON-RPC client.
//!
//! A wiremock server plays the aria2 daemon.

mod support;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use smartdl_core::engine::{Aria2Options, PollReading};
use smartdl_core::{Aria2Client, DownloadError, EngineDriver, EngineError, ResourceDescriptor};
use support::socket_guard::start_mock_server_or_skip;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "token:s3cret";

fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "smartdl-1",
        "jsonrpc": "2.0",
        "result": result
    }))
}

fn driver(server: &MockServer, download_dir: &TempDir) -> EngineDriver {
    let client = Aria2Client::new(
        format!("{}/jsonrpc", server.uri()),
        Some("s3cret".to_string()),
        Duration::from_secs(5),
    )
    .expect("Failed to build client")
    .with_options(Aria2Options {
        max_connections_per_server: 8,
        split: 8,
        min_split_size_mb: 5,
    });
    EngineDriver::new(Arc::new(client), download_dir.path())
}

async fn mount_status(server: &MockServer, gid: &str, status: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({
            "method": "aria2.tellStatus",
            "params": [SECRET, gid]
        })))
        .respond_with(rpc_result(status))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_direct_transfer_runs_to_completion() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let download_dir = TempDir::new().expect("Failed to create temp dir");
    let dir = download_dir.path().display().to_string();

    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({
            "method": "aria2.addUri",
            "params": [
                SECRET,
                ["https://cdn.example.com/movie.mkv"],
                {
                    "dir": dir,
                    "out": "Movie.mkv",
                    "max-connection-per-server": "8",
                    "split": "8",
                    "min-split-size": "5M",
                    "header": ["Referer: https://example.com/watch", "Cookie: session=abc"]
                }
            ]
        })))
        .respond_with(rpc_result(json!("2089b05ecca3d829")))
        .expect(1)
        .mount(&server)
        .await;

    mount_status(
        &server,
        "2089b05ecca3d829",
        json!({
            "gid": "2089b05ecca3d829",
            "status": "active",
            "totalLength": "1000",
            "completedLength": "400",
            "downloadSpeed": "100"
        }),
    )
    .await;
    let file = download_dir.path().join("Movie.mkv");
    mount_status(
        &server,
        "2089b05ecca3d829",
        json!({
            "gid": "2089b05ecca3d829",
            "status": "complete",
            "totalLength": "1000",
            "completedLength": "1000",
            "downloadSpeed": "0",
            "files": [{"path": file.display().to_string()}]
        }),
    )
    .await;
    std::fs::write(&file, b"movie").expect("write payload");

    let driver = driver(&server, &download_dir);
    let mut resource = ResourceDescriptor::new("https://cdn.example.com/movie.mkv", "Movie");
    resource.suggested_filename = Some("Movie.mkv".to_string());
    resource
        .headers
        .insert("Referer".to_string(), "https://example.com/watch".to_string());
    resource.cookies = vec![smartdl_core::job::Cookie {
        name: "session".to_string(),
        value: "abc".to_string(),
    }];

    let mut transfer = driver.submit(&resource).await.expect("submit");
    assert_eq!(transfer.handle().0, "2089b05ecca3d829");

    let PollReading::Running(progress) = driver.poll(&mut transfer).await.expect("poll") else {
        panic!("transfer should still be running");
    };
    assert_eq!(progress.bytes_downloaded, 400);
    assert_eq!(progress.bytes_total, Some(1000));
    assert!((progress.percent - 40.0).abs() < f64::EPSILON);
    assert_eq!(progress.eta_seconds, Some(6));

    let reading = driver.poll(&mut transfer).await.expect("poll");
    assert_eq!(reading, PollReading::Finished(file));
}

#[tokio::test]
async fn test_magnet_follows_metadata_handover() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let download_dir = TempDir::new().expect("Failed to create temp dir");

    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "aria2.addUri"})))
        .respond_with(rpc_result(json!("meta0001")))
        .mount(&server)
        .await;
    mount_status(
        &server,
        "meta0001",
        json!({
            "gid": "meta0001",
            "status": "complete",
            "totalLength": "20480",
            "completedLength": "20480",
            "downloadSpeed": "0",
            "followedBy": ["data0002"]
        }),
    )
    .await;
    mount_status(
        &server,
        "data0002",
        json!({
            "gid": "data0002",
            "status": "active",
            "totalLength": "4000000",
            "completedLength": "1024",
            "downloadSpeed": "512"
        }),
    )
    .await;
    // Multi-file payload: resolves to the torrent's top-level directory.
    let root = download_dir.path().join("Season 1");
    std::fs::create_dir_all(&root).expect("create payload dir");
    mount_status(
        &server,
        "data0002",
        json!({
            "gid": "data0002",
            "status": "complete",
            "totalLength": "4000000",
            "completedLength": "4000000",
            "downloadSpeed": "0",
            "files": [
                {"path": root.join("e01.mkv").display().to_string()},
                {"path": root.join("e02.mkv").display().to_string()}
            ]
        }),
    )
    .await;

    let driver = driver(&server, &download_dir);
    let resource = ResourceDescriptor::new("magnet:?xt=urn:btih:abc&dn=Season+1", "Season 1");
    let mut transfer = driver.submit(&resource).await.expect("submit");

    let PollReading::Running(handover) = driver.poll(&mut transfer).await.unwrap() else {
        panic!("metadata completion must hand over, not finish");
    };
    assert_eq!(transfer.handle().0, "data0002");
    assert_eq!(handover.bytes_downloaded, 0);
    assert!(handover.percent < 100.0, "metadata completion is not payload completion");

    let PollReading::Running(payload) = driver.poll(&mut transfer).await.unwrap() else {
        panic!("payload should be running");
    };
    assert_eq!(payload.bytes_downloaded, 1024);
    assert_eq!(payload.bytes_total, Some(4_000_000));

    let reading = driver.poll(&mut transfer).await.unwrap();
    assert_eq!(reading, PollReading::Finished(root));
}

#[tokio::test]
async fn test_engine_error_status_and_abort() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let download_dir = TempDir::new().expect("Failed to create temp dir");

    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "aria2.addUri"})))
        .respond_with(rpc_result(json!("gid0001")))
        .mount(&server)
        .await;
    mount_status(
        &server,
        "gid0001",
        json!({
            "gid": "gid0001",
            "status": "error",
            "totalLength": "0",
            "completedLength": "0",
            "downloadSpeed": "0",
            "errorCode": "3",
            "errorMessage": "Resource not found"
        }),
    )
    .await;
    // After forceRemove the transfer reads as removed.
    mount_status(
        &server,
        "gid0001",
        json!({"gid": "gid0001", "status": "removed"}),
    )
    .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "aria2.forceRemove",
            "params": [SECRET, "gid0001"]
        })))
        .respond_with(rpc_result(json!("gid0001")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "aria2.removeDownloadResult",
            "params": [SECRET, "gid0001"]
        })))
        .respond_with(rpc_result(json!("OK")))
        .expect(1)
        .mount(&server)
        .await;

    let driver = driver(&server, &download_dir);
    let resource = ResourceDescriptor::new("https://cdn.example.com/gone.bin", "Gone");
    let mut transfer = driver.submit(&resource).await.expect("submit");

    let err = driver.poll(&mut transfer).await.unwrap_err();
    assert!(matches!(
        &err,
        DownloadError::Engine { code: Some(code), .. } if code == "3"
    ));
    assert_eq!(err.to_string(), "download failed: Resource not found");

    driver.abort(&transfer).await;
}

#[tokio::test]
async fn test_completed_without_file_on_disk_is_an_error() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let download_dir = TempDir::new().expect("Failed to create temp dir");

    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "aria2.addUri"})))
        .respond_with(rpc_result(json!("gid0001")))
        .mount(&server)
        .await;
    mount_status(
        &server,
        "gid0001",
        json!({
            "gid": "gid0001",
            "status": "complete",
            "totalLength": "10",
            "completedLength": "10",
            "downloadSpeed": "0",
            "files": [{"path": "never-written.bin"}]
        }),
    )
    .await;

    let driver = driver(&server, &download_dir);
    let resource = ResourceDescriptor::new("https://cdn.example.com/x.bin", "X");
    let mut transfer = driver.submit(&resource).await.expect("submit");

    let err = driver.poll(&mut transfer).await.unwrap_err();
    assert!(matches!(
        err,
        DownloadError::FileMissing { ref path }
            if *path == download_dir.path().join("never-written.bin")
    ));
}

#[tokio::test]
async fn test_rejected_submission_surfaces_rpc_error() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let download_dir = TempDir::new().expect("Failed to create temp dir");

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "id": "smartdl-1",
            "jsonrpc": "2.0",
            "error": {"code": 1, "message": "Unauthorized"}
        })))
        .mount(&server)
        .await;

    let driver = driver(&server, &download_dir);
    let resource = ResourceDescriptor::new("https://cdn.example.com/x.bin", "X");
    let err = driver.submit(&resource).await.unwrap_err();
    assert!(matches!(
        err,
        DownloadError::Rpc(EngineError::Rpc { code: 1, ref message }) if message == "Unauthorized"
    ));
}

#[tokio::test]
async fn test_version_reports_daemon_version() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "aria2.getVersion",
            "params": [SECRET]
        })))
        .respond_with(rpc_result(json!({"version": "1.37.0", "enabledFeatures": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = Aria2Client::new(
        format!("{}/jsonrpc", server.uri()),
        Some("s3cret".to_string()),
        Duration::from_secs(5),
    )
    .unwrap();
    assert_eq!(client.version().await.unwrap(), "1.37.0");
}
