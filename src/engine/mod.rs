//! External download engine access.
//!
//! The engine moves the bytes; this crate only tells it what to fetch, reads
//! its status and removes transfers. [`EngineRpc`] is the narrow RPC seam,
//! [`Aria2Client`] the aria2 JSON-RPC implementation, and [`EngineDriver`]
//! the only component that talks to it.

mod aria2;
mod driver;
mod error;

pub use aria2::{Aria2Client, Aria2Options};
pub use driver::{EngineDriver, PollReading, ProgressTracker, Transfer};
pub use error::{DownloadError, EngineError};

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

/// Engine-side identifier of one transfer (an aria2 GID).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineHandle(pub String);

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What to hand the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRequest {
    /// URL or magnet link.
    pub url: String,
    /// Request headers as `Name: value` lines (cookies included).
    pub headers: Vec<String>,
    /// Destination directory.
    pub dir: PathBuf,
    /// Output filename; `None` lets the engine choose.
    pub out: Option<String>,
}

/// Transfer state as the engine reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Active,
    Waiting,
    Paused,
    Complete,
    Error,
    Removed,
}

impl TransferState {
    /// Parses an aria2 status string. Unknown values read as `Waiting`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "active" => Self::Active,
            "paused" => Self::Paused,
            "complete" => Self::Complete,
            "error" => Self::Error,
            "removed" => Self::Removed,
            _ => Self::Waiting,
        }
    }
}

/// One status reading of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStatus {
    pub state: TransferState,
    pub total_length: u64,
    pub completed_length: u64,
    pub download_speed: u64,
    /// Paths of the files the transfer writes.
    pub files: Vec<PathBuf>,
    /// Transfers this one handed over to (magnet metadata → payload).
    pub followed_by: Vec<EngineHandle>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Narrow RPC surface of a download engine.
#[async_trait]
pub trait EngineRpc: Send + Sync {
    /// Queues a transfer and returns its handle.
    async fn add_download(&self, request: &AddRequest) -> Result<EngineHandle, EngineError>;

    /// Reads the transfer's status.
    async fn status(&self, handle: &EngineHandle) -> Result<TransferStatus, EngineError>;

    /// Stops the transfer and forgets its result.
    async fn remove(&self, handle: &EngineHandle) -> Result<(), EngineError>;
}
