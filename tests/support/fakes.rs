//! Scripted stand-ins for extractors and the download engine.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use smartdl_core::engine::{AddRequest, EngineHandle, TransferState, TransferStatus};
use smartdl_core::{
    EngineError, EngineRpc, ExtractError, Extractor, JobId, ResourceDescriptor, SourceKind,
};

/// Extractor with a fixed probe answer and a queue of extraction results.
pub struct ScriptedExtractor {
    kind: SourceKind,
    accepts: bool,
    results: Mutex<VecDeque<Result<ResourceDescriptor, ExtractError>>>,
    calls: AtomicU64,
    delay: Duration,
}

impl ScriptedExtractor {
    pub fn new(kind: SourceKind, accepts: bool) -> Self {
        Self {
            kind,
            accepts,
            results: Mutex::new(VecDeque::new()),
            calls: AtomicU64::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_results(
        kind: SourceKind,
        results: Vec<Result<ResourceDescriptor, ExtractError>>,
    ) -> Self {
        Self {
            kind,
            accepts: true,
            results: Mutex::new(results.into()),
            calls: AtomicU64::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Makes every extraction take `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn probe(&self, _locator: &str) -> Result<bool, ExtractError> {
        Ok(self.accepts)
    }

    async fn extract(
        &self,
        locator: &str,
        _job_id: JobId,
    ) -> Result<ResourceDescriptor, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ExtractError::no_media(locator)))
    }
}

/// Builds a status reading.
pub fn status(state: TransferState, completed: u64, total: u64) -> TransferStatus {
    TransferStatus {
        state,
        total_length: total,
        completed_length: completed,
        download_speed: 1024,
        files: Vec::new(),
        followed_by: Vec::new(),
        error_code: None,
        error_message: None,
    }
}

pub fn failed_status(message: &str) -> TransferStatus {
    let mut status = status(TransferState::Error, 0, 0);
    status.error_code = Some("1".to_string());
    status.error_message = Some(message.to_string());
    status
}

pub fn complete_status(files: Vec<PathBuf>) -> TransferStatus {
    let mut status = status(TransferState::Complete, 100, 100);
    status.files = files;
    status
}

/// Engine that replays a status script. Once the script runs out it reports
/// an ever-growing active transfer.
#[derive(Default)]
pub struct ScriptedEngine {
    script: Mutex<VecDeque<TransferStatus>>,
    next_gid: AtomicU64,
    polls: AtomicU64,
    pub added: Mutex<Vec<AddRequest>>,
    pub polled: Mutex<Vec<EngineHandle>>,
    pub removed: Mutex<Vec<EngineHandle>>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<TransferStatus>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn added_count(&self) -> usize {
        self.added.lock().unwrap().len()
    }

    pub fn removed_count(&self) -> usize {
        self.removed.lock().unwrap().len()
    }
}

#[async_trait]
impl EngineRpc for ScriptedEngine {
    async fn add_download(&self, request: &AddRequest) -> Result<EngineHandle, EngineError> {
        self.added.lock().unwrap().push(request.clone());
        let gid = self.next_gid.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(EngineHandle(format!("gid-{gid}")))
    }

    async fn status(&self, handle: &EngineHandle) -> Result<TransferStatus, EngineError> {
        self.polled.lock().unwrap().push(handle.clone());
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        let scripted = self.script.lock().unwrap().pop_front();
        Ok(scripted
            .unwrap_or_else(|| status(TransferState::Active, polls * 100, 1_000_000)))
    }

    async fn remove(&self, handle: &EngineHandle) -> Result<(), EngineError> {
        self.removed.lock().unwrap().push(handle.clone());
        Ok(())
    }
}
