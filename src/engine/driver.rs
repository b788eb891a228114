//! Engine driver: turns resource descriptors into engine transfers and
//! engine status readings into job progress.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::{
    AddRequest, DownloadError, EngineHandle, EngineRpc, TransferState, TransferStatus,
};
use crate::job::{Progress, ResourceDescriptor};

/// Keeps reported byte counts from going backwards within one transfer.
///
/// Readings below the best seen so far are clamped, including across a
/// magnet's handover from its metadata transfer to the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressTracker {
    best_bytes: u64,
    last_total: Option<u64>,
}

impl ProgressTracker {
    /// Folds one status reading into a progress value.
    pub fn observe(&mut self, status: &TransferStatus) -> Progress {
        self.best_bytes = self.best_bytes.max(status.completed_length);
        if status.total_length > 0 {
            self.last_total = Some(status.total_length);
        }
        let total = self.last_total.map(|total| total.max(self.best_bytes));
        Progress::from_counters(self.best_bytes, total, status.download_speed)
    }

    /// Progress as of the last observed reading, with no speed.
    #[must_use]
    pub fn snapshot(&self) -> Progress {
        let total = self.last_total.map(|total| total.max(self.best_bytes));
        Progress::from_counters(self.best_bytes, total, 0)
    }

    /// Highest byte count reported so far.
    #[must_use]
    pub fn bytes_downloaded(&self) -> u64 {
        self.best_bytes
    }
}

/// One submitted transfer as the driver tracks it.
#[derive(Debug, Clone)]
pub struct Transfer {
    handle: EngineHandle,
    out: Option<String>,
    tracker: ProgressTracker,
}

impl Transfer {
    /// Engine handle currently being followed.
    #[must_use]
    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    /// Carries the byte count of an earlier attempt over, so a retried
    /// transfer never reports less than was already shown.
    pub fn raise_floor(&mut self, bytes: u64) {
        self.tracker.best_bytes = self.tracker.best_bytes.max(bytes);
    }
}

/// What a poll saw.
#[derive(Debug, Clone, PartialEq)]
pub enum PollReading {
    /// Still transferring.
    Running(Progress),
    /// Finished; the file is on disk at this path.
    Finished(PathBuf),
}

/// Sole user of the engine RPC.
#[derive(Clone)]
pub struct EngineDriver {
    rpc: Arc<dyn EngineRpc>,
    download_dir: PathBuf,
}

impl std::fmt::Debug for EngineDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineDriver")
            .field("download_dir", &self.download_dir)
            .finish_non_exhaustive()
    }
}

impl EngineDriver {
    /// Creates a driver writing into `download_dir`.
    #[must_use]
    pub fn new(rpc: Arc<dyn EngineRpc>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            rpc,
            download_dir: download_dir.into(),
        }
    }

    /// Destination directory for every transfer.
    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Hands `resource` to the engine.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Rpc`] if the engine refuses or is unreachable.
    #[instrument(skip(self, resource), fields(url = %resource.url))]
    pub async fn submit(&self, resource: &ResourceDescriptor) -> Result<Transfer, DownloadError> {
        let request = build_request(resource, &self.download_dir);
        let handle = self.rpc.add_download(&request).await?;
        info!(gid = %handle, "transfer submitted");
        Ok(Transfer {
            handle,
            out: request.out,
            tracker: ProgressTracker::default(),
        })
    }

    /// Reads the transfer's state once.
    ///
    /// Follows a completed transfer to the one it was handed over to.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::Rpc`] if the status call failed
    /// - [`DownloadError::Engine`] if the engine reports an error
    /// - [`DownloadError::Removed`] if the transfer vanished
    /// - [`DownloadError::FileMissing`] if completion left no file behind
    pub async fn poll(&self, transfer: &mut Transfer) -> Result<PollReading, DownloadError> {
        let status = self.rpc.status(&transfer.handle).await?;
        debug!(
            gid = %transfer.handle,
            state = ?status.state,
            completed = status.completed_length,
            total = status.total_length,
            "engine status"
        );

        match status.state {
            TransferState::Complete => {
                // The finished metadata transfer's size is not the payload's.
                if let Some(next) = status.followed_by.first() {
                    info!(from = %transfer.handle, to = %next, "transfer handed over");
                    transfer.handle = next.clone();
                    return Ok(PollReading::Running(transfer.tracker.snapshot()));
                }
                let path = self.resolve_file(&status, transfer.out.as_deref()).await?;
                Ok(PollReading::Finished(path))
            }
            TransferState::Error => Err(DownloadError::engine(
                status.error_code.clone(),
                status
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "engine reported an error".to_string()),
            )),
            TransferState::Removed => Err(DownloadError::Removed),
            TransferState::Active | TransferState::Waiting | TransferState::Paused => {
                Ok(PollReading::Running(transfer.tracker.observe(&status)))
            }
        }
    }

    /// Stops the transfer and clears it from the engine. Failures are logged.
    #[instrument(skip(self, transfer), fields(gid = %transfer.handle))]
    pub async fn abort(&self, transfer: &Transfer) {
        if let Err(err) = self.rpc.remove(&transfer.handle).await {
            warn!(error = %err, "could not remove transfer from engine");
        }
    }

    /// Works out where a completed transfer left its file.
    ///
    /// A single file reported by the engine wins; relative paths are taken
    /// relative to the download directory. A multi-file transfer resolves to
    /// its top-level entry under the download directory.
    async fn resolve_file(
        &self,
        status: &TransferStatus,
        out: Option<&str>,
    ) -> Result<PathBuf, DownloadError> {
        let candidate = match status.files.as_slice() {
            [] => match out {
                Some(name) => self.download_dir.join(name),
                None => {
                    return Err(DownloadError::FileMissing {
                        path: self.download_dir.clone(),
                    });
                }
            },
            [single] => self.absolute(single),
            [first, ..] => {
                let first = self.absolute(first);
                top_level_entry(&self.download_dir, &first).unwrap_or(first)
            }
        };

        match tokio::fs::try_exists(&candidate).await {
            Ok(true) => Ok(candidate),
            Ok(false) | Err(_) => Err(DownloadError::FileMissing { path: candidate }),
        }
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match path.file_name() {
            Some(name) => self.download_dir.join(name),
            None => self.download_dir.join(path),
        }
    }
}

fn top_level_entry(root: &Path, path: &Path) -> Option<PathBuf> {
    let first = path.strip_prefix(root).ok()?.components().next()?;
    Some(root.join(first))
}

fn build_request(resource: &ResourceDescriptor, download_dir: &Path) -> AddRequest {
    let mut headers: Vec<String> = resource
        .headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("cookie"))
        .map(|(name, value)| format!("{name}: {value}"))
        .collect();
    if let Some(cookie) = resource.cookie_header() {
        headers.push(format!("Cookie: {cookie}"));
    }

    AddRequest {
        url: resource.url.clone(),
        headers,
        dir: download_dir.to_path_buf(),
        out: resource.suggested_filename.clone(),
    }
}
