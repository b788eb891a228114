//! aria2 JSON-RPC client.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};

use super::{AddRequest, EngineError, EngineHandle, EngineRpc, TransferState, TransferStatus};
use crate::user_agent::default_user_agent;

/// `tellStatus` keys the driver reads.
const STATUS_KEYS: &[&str] = &[
    "gid",
    "status",
    "totalLength",
    "completedLength",
    "downloadSpeed",
    "files",
    "followedBy",
    "errorCode",
    "errorMessage",
];

/// Status checks made while a force-removed transfer winds down.
const REMOVE_SETTLE_POLLS: u32 = 20;
const REMOVE_SETTLE_INTERVAL: Duration = Duration::from_millis(50);

/// Per-transfer options sent with every `aria2.addUri`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aria2Options {
    pub max_connections_per_server: u32,
    pub split: u32,
    /// Minimum segment size in MiB.
    pub min_split_size_mb: u32,
}

impl Default for Aria2Options {
    fn default() -> Self {
        Self {
            max_connections_per_server: 16,
            split: 16,
            min_split_size_mb: 10,
        }
    }
}

/// aria2 daemon reached over JSON-RPC on HTTP.
#[derive(Debug)]
pub struct Aria2Client {
    client: Client,
    rpc_url: String,
    secret: Option<String>,
    options: Aria2Options,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl Aria2Client {
    /// Creates a client for the daemon at `rpc_url`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        rpc_url: impl Into<String>,
        secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let client = Client::builder()
            .user_agent(default_user_agent())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            rpc_url: rpc_url.into(),
            secret: secret.filter(|value| !value.is_empty()),
            options: Aria2Options::default(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Replaces the per-transfer options.
    #[must_use]
    pub fn with_options(mut self, options: Aria2Options) -> Self {
        self.options = options;
        self
    }

    /// Checks that the daemon answers, returning its version string.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if the daemon is unreachable or refuses.
    pub async fn version(&self) -> Result<String, EngineError> {
        let result = self.call("aria2.getVersion", Vec::new()).await?;
        result
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| EngineError::InvalidResponse("missing version".to_string()))
    }

    fn transfer_options(&self, request: &AddRequest) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert(
            "dir".to_string(),
            Value::String(request.dir.display().to_string()),
        );
        if let Some(out) = &request.out {
            options.insert("out".to_string(), Value::String(out.clone()));
        }
        options.insert(
            "max-connection-per-server".to_string(),
            Value::String(self.options.max_connections_per_server.to_string()),
        );
        options.insert(
            "split".to_string(),
            Value::String(self.options.split.to_string()),
        );
        options.insert(
            "min-split-size".to_string(),
            Value::String(format!("{}M", self.options.min_split_size_mb)),
        );
        options.insert("continue".to_string(), Value::String("true".to_string()));
        options.insert(
            "auto-file-renaming".to_string(),
            Value::String("true".to_string()),
        );
        if !request.headers.is_empty() {
            options.insert("header".to_string(), json!(request.headers));
        }
        options
    }

    #[instrument(skip(self, params), fields(rpc_url = %self.rpc_url))]
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, EngineError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut all_params = Vec::with_capacity(params.len() + 1);
        if let Some(secret) = &self.secret {
            all_params.push(Value::String(format!("token:{secret}")));
        }
        all_params.extend(params);

        let body = json!({
            "jsonrpc": "2.0",
            "id": format!("smartdl-{id}"),
            "method": method,
            "params": all_params,
        });

        let response = self.client.post(&self.rpc_url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(status = status.as_u16(), "aria2 RPC response");

        // aria2 answers RPC errors with HTTP 400 and a JSON body.
        let parsed: RpcResponse = serde_json::from_str(&text).map_err(|err| {
            if status.is_success() {
                EngineError::InvalidResponse(err.to_string())
            } else {
                EngineError::Transport(format!("HTTP {}", status.as_u16()))
            }
        })?;

        if let Some(error) = parsed.error {
            return Err(EngineError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        parsed
            .result
            .ok_or_else(|| EngineError::InvalidResponse("missing result".to_string()))
    }
}

#[async_trait]
impl EngineRpc for Aria2Client {
    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn add_download(&self, request: &AddRequest) -> Result<EngineHandle, EngineError> {
        let options = self.transfer_options(request);
        let result = self
            .call(
                "aria2.addUri",
                vec![json!([request.url]), Value::Object(options)],
            )
            .await?;
        result
            .as_str()
            .map(|gid| EngineHandle(gid.to_string()))
            .ok_or_else(|| EngineError::InvalidResponse("addUri did not return a GID".to_string()))
    }

    async fn status(&self, handle: &EngineHandle) -> Result<TransferStatus, EngineError> {
        let result = self
            .call(
                "aria2.tellStatus",
                vec![Value::String(handle.0.clone()), json!(STATUS_KEYS)],
            )
            .await?;
        parse_status(&result)
    }

    #[instrument(skip(self))]
    async fn remove(&self, handle: &EngineHandle) -> Result<(), EngineError> {
        // Finished or already-removed transfers reject forceRemove; the result
        // entry still needs clearing.
        match self
            .call("aria2.forceRemove", vec![Value::String(handle.0.clone())])
            .await
        {
            Ok(_) => self.wait_until_stopped(handle).await,
            Err(EngineError::Rpc { code, message }) => {
                debug!(code, message = %message, "forceRemove rejected");
            }
            Err(err) => return Err(err),
        }

        match self
            .call(
                "aria2.removeDownloadResult",
                vec![Value::String(handle.0.clone())],
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(EngineError::Rpc { code, message }) => {
                debug!(gid = %handle, code, message = %message, "download result not removed");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

impl Aria2Client {
    /// forceRemove returns before the transfer stops; its result can only be
    /// cleared once it has.
    async fn wait_until_stopped(&self, handle: &EngineHandle) {
        for _ in 0..REMOVE_SETTLE_POLLS {
            match self.status(handle).await {
                Ok(status)
                    if matches!(
                        status.state,
                        TransferState::Active | TransferState::Waiting | TransferState::Paused
                    ) =>
                {
                    tokio::time::sleep(REMOVE_SETTLE_INTERVAL).await;
                }
                Ok(_) => return,
                Err(err) => {
                    debug!(gid = %handle, error = %err, "status unavailable after forceRemove");
                    return;
                }
            }
        }
        warn!(gid = %handle, "transfer still active after forceRemove");
    }
}

/// aria2 encodes numbers as decimal strings.
fn number_field(value: &Value, key: &str) -> u64 {
    match value.get(key) {
        Some(Value::String(text)) => text.parse().unwrap_or(0),
        Some(Value::Number(number)) => number.as_u64().unwrap_or(0),
        _ => 0,
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn parse_status(value: &Value) -> Result<TransferStatus, EngineError> {
    let status = value
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::InvalidResponse("tellStatus without status".to_string()))?;

    let files = value
        .get("files")
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .filter_map(|file| file.get("path").and_then(Value::as_str))
                .filter(|path| !path.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default();

    let followed_by = value
        .get("followedBy")
        .and_then(Value::as_array)
        .map(|gids| {
            gids.iter()
                .filter_map(Value::as_str)
                .map(|gid| EngineHandle(gid.to_string()))
                .collect()
        })
        .unwrap_or_default();

    Ok(TransferStatus {
        state: TransferState::parse(status),
        total_length: number_field(value, "totalLength"),
        completed_length: number_field(value, "completedLength"),
        download_speed: number_field(value, "downloadSpeed"),
        files,
        followed_by,
        error_code: string_field(value, "errorCode").filter(|code| code != "0"),
        error_message: string_field(value, "errorMessage"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, ResponseTemplate};

    use super::*;
    use crate::test_support::socket_guard::start_mock_server_or_skip;

    fn client(url: &str, secret: Option<&str>) -> Aria2Client {
        Aria2Client::new(url, secret.map(str::to_string), Duration::from_secs(5)).unwrap()
    }

    fn rpc_ok(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "id": "smartdl-0",
            "jsonrpc": "2.0",
            "result": result
        }))
    }

    fn request() -> AddRequest {
        AddRequest {
            url: "https://cdn.example.com/a.bin".to_string(),
            headers: vec!["Referer: https://example.com".to_string()],
            dir: PathBuf::from("/data/downloads"),
            out: Some("A.bin".to_string()),
        }
    }

    #[test]
    fn test_parse_status_reads_string_numbers() {
        let value = json!({
            "gid": "abc",
            "status": "active",
            "totalLength": "1000",
            "completedLength": "250",
            "downloadSpeed": "50",
            "files": [{"path": "/data/a.bin"}, {"path": ""}],
            "followedBy": ["def"],
            "errorCode": "0"
        });
        let status = parse_status(&value).unwrap();
        assert_eq!(status.state, TransferState::Active);
        assert_eq!(status.total_length, 1000);
        assert_eq!(status.completed_length, 250);
        assert_eq!(status.download_speed, 50);
        assert_eq!(status.files, vec![PathBuf::from("/data/a.bin")]);
        assert_eq!(status.followed_by, vec![EngineHandle("def".to_string())]);
        assert_eq!(status.error_code, None);
    }

    #[test]
    fn test_parse_status_requires_status() {
        let err = parse_status(&json!({"gid": "abc"})).unwrap_err();
        assert!(matches!(err, EngineError::InvalidResponse(_)));
    }

    #[test]
    fn test_transfer_options_include_headers_and_output() {
        let client = client("http://127.0.0.1:1/jsonrpc", None);
        let options = client.transfer_options(&request());
        assert_eq!(options["dir"], json!("/data/downloads"));
        assert_eq!(options["out"], json!("A.bin"));
        assert_eq!(options["split"], json!("16"));
        assert_eq!(options["min-split-size"], json!("10M"));
        assert_eq!(options["continue"], json!("true"));
        assert_eq!(options["header"], json!(["Referer: https://example.com"]));
    }

    #[tokio::test]
    async fn test_add_download_sends_token_and_returns_gid() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "aria2.addUri",
                "params": ["token:s3cret", ["https://cdn.example.com/a.bin"]]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({
                    "id": "smartdl-1",
                    "jsonrpc": "2.0",
                    "result": "2089b05ecca3d829"
                })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/jsonrpc", server.uri());
        let handle = client(&url, Some("s3cret"))
            .add_download(&request())
            .await
            .unwrap();
        assert_eq!(handle, EngineHandle("2089b05ecca3d829".to_string()));
    }

    #[tokio::test]
    async fn test_rpc_error_body_is_reported() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "id": "smartdl-1",
                "jsonrpc": "2.0",
                "error": {"code": 1, "message": "Unauthorized"}
            })))
            .mount(&server)
            .await;

        let url = format!("{}/jsonrpc", server.uri());
        let err = client(&url, Some("wrong"))
            .status(&EngineHandle("abc".to_string()))
            .await
            .unwrap_err();
        match err {
            EngineError::Rpc { code, message } => {
                assert_eq!(code, 1);
                assert_eq!(message, "Unauthorized");
            }
            other => panic!("expected Rpc error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remove_tolerates_rejected_force_remove() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "aria2.forceRemove"})))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "id": "x", "jsonrpc": "2.0",
                "error": {"code": 1, "message": "Active Download not found for GID#abc"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "aria2.removeDownloadResult"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "y", "jsonrpc": "2.0", "result": "OK"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/jsonrpc", server.uri());
        client(&url, None)
            .remove(&EngineHandle("abc".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_remove_clears_result_once_transfer_stopped() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "aria2.forceRemove"})))
            .respond_with(rpc_ok(json!("abc")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "aria2.tellStatus"})))
            .respond_with(rpc_ok(json!({"gid": "abc", "status": "active"})))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "aria2.tellStatus"})))
            .respond_with(rpc_ok(json!({"gid": "abc", "status": "removed"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "aria2.removeDownloadResult"})))
            .respond_with(rpc_ok(json!("OK")))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/jsonrpc", server.uri());
        client(&url, None)
            .remove(&EngineHandle("abc".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_remove_ignores_rejected_result_removal() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "aria2.forceRemove"})))
            .respond_with(rpc_ok(json!("abc")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "aria2.tellStatus"})))
            .respond_with(rpc_ok(json!({"gid": "abc", "status": "removed"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "aria2.removeDownloadResult"})))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "id": "z", "jsonrpc": "2.0",
                "error": {"code": 1, "message": "Could not remove download result of GID#abc"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/jsonrpc", server.uri());
        let result = client(&url, None).remove(&EngineHandle("abc".to_string())).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_transport_error() {
        let err = client("http://127.0.0.1:1/jsonrpc", None)
            .version()
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport(_)));
    }
}
