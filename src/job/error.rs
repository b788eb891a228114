//! Error types for job store operations.

use thiserror::Error;

use super::JobId;

/// Errors that can occur during job store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A query or migration failed in SQLite.
    #[error("database error: {0}")]
    Database(String),

    /// No job row has this id.
    #[error("job not found: id {0}\n  Suggestion: Run `smartdl list` to see known job IDs")]
    JobNotFound(JobId),

    /// The resource descriptor could not be written as JSON.
    #[error("failed to encode resource descriptor: {0}")]
    Encode(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}
