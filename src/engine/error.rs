//! Error types for the engine RPC and the download stage.

use std::path::PathBuf;

use thiserror::Error;

use crate::retry::RetryableError;

/// Failures talking to the download engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The RPC endpoint could not be reached or timed out.
    #[error("engine transport error: {0}")]
    Transport(String),

    /// The engine answered with a JSON-RPC error.
    #[error("engine RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Engine-provided message.
        message: String,
    },

    /// The engine answered with something that is not a valid reply.
    #[error("invalid engine response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Why one download attempt did not produce a file.
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// The engine reported the transfer as failed.
    #[error("download failed: {message}")]
    Engine {
        /// Engine error code, when reported.
        code: Option<String>,
        /// Engine error message.
        message: String,
    },

    /// The transfer disappeared from the engine without completing.
    #[error("download was removed from the engine")]
    Removed,

    /// The engine could not be driven.
    #[error(transparent)]
    Rpc(#[from] EngineError),

    /// The engine reported completion but the file is not where expected.
    #[error("download complete but file not found: {}", .path.display())]
    FileMissing {
        /// Path that was checked.
        path: PathBuf,
    },

    /// Cancellation was observed during the transfer.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Creates an engine-reported failure.
    pub fn engine(code: Option<String>, message: impl Into<String>) -> Self {
        Self::Engine {
            code,
            message: message.into(),
        }
    }
}

impl RetryableError for DownloadError {
    fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
