//! Job record, lifecycle states and progress snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::resource::ResourceDescriptor;
use crate::classify::SourceKind;

/// Opaque job identifier assigned at enqueue time.
pub type JobId = i64;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for the scheduler.
    Pending,
    /// Locator syntax check and capability probing.
    Classifying,
    /// Resolving a fetchable resource.
    Extracting,
    /// Comparing the declared size against the per-file ceiling.
    SizeCheck,
    /// Bytes moving through the engine.
    Downloading,
    /// File on disk and handed off.
    Completed,
    /// Retry budget exhausted or locator unclassifiable.
    Failed,
    /// Cancelled on request.
    Cancelled,
    /// Declared size over the ceiling; nothing was transferred.
    SkippedTooLarge,
}

impl JobState {
    /// Every state, in lifecycle order.
    pub const ALL: [Self; 9] = [
        Self::Pending,
        Self::Classifying,
        Self::Extracting,
        Self::SizeCheck,
        Self::Downloading,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::SkippedTooLarge,
    ];

    /// States in which a job is owned by the running scheduler.
    pub const ACTIVE: [Self; 4] = [
        Self::Classifying,
        Self::Extracting,
        Self::SizeCheck,
        Self::Downloading,
    ];

    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Classifying => "classifying",
            Self::Extracting => "extracting",
            Self::SizeCheck => "size_check",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::SkippedTooLarge => "skipped_too_large",
        }
    }

    /// True once the job can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::SkippedTooLarge
        )
    }

    /// True while the scheduler is working on the job.
    #[must_use]
    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "classifying" => Ok(Self::Classifying),
            "extracting" => Ok(Self::Extracting),
            "size_check" => Ok(Self::SizeCheck),
            "downloading" => Ok(Self::Downloading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "skipped_too_large" => Ok(Self::SkippedTooLarge),
            _ => Err(format!("invalid job state: {s}")),
        }
    }
}

/// Transfer progress as last reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Progress {
    /// Completion percentage in `[0, 100]`.
    pub percent: f64,
    /// Bytes written so far.
    pub bytes_downloaded: u64,
    /// Expected total, when the engine knows it.
    pub bytes_total: Option<u64>,
    /// Current transfer rate.
    pub speed_bytes_per_sec: u64,
    /// Estimated seconds remaining, when computable.
    pub eta_seconds: Option<u64>,
}

impl Progress {
    /// Builds a snapshot, deriving percent and ETA from the raw counters.
    #[must_use]
    pub fn from_counters(bytes_downloaded: u64, bytes_total: Option<u64>, speed: u64) -> Self {
        let total = bytes_total.filter(|total| *total > 0);
        #[allow(clippy::cast_precision_loss)]
        let percent = total.map_or(0.0, |total| {
            (bytes_downloaded as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
        });
        let eta_seconds = match total {
            Some(total) if speed > 0 => Some(total.saturating_sub(bytes_downloaded) / speed),
            _ => None,
        };

        Self {
            percent,
            bytes_downloaded,
            bytes_total: total,
            speed_bytes_per_sec: speed,
            eta_seconds,
        }
    }
}

/// A single job row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    /// Unique identifier.
    pub id: JobId,
    /// Locator exactly as submitted.
    pub locator: String,
    /// Classified kind (stored as text, parsed via `kind()`).
    #[sqlx(rename = "kind")]
    #[serde(rename = "kind")]
    pub kind_str: Option<String>,
    /// Lifecycle state (stored as text, parsed via `state()`).
    #[sqlx(rename = "state")]
    #[serde(rename = "state")]
    pub state_str: String,
    /// Resolved descriptor as JSON, parsed via `resource()`.
    #[sqlx(rename = "resource")]
    #[serde(skip)]
    pub resource_json: Option<String>,
    /// Completion percentage.
    pub percent: f64,
    /// Bytes written so far.
    pub bytes_downloaded: i64,
    /// Expected total bytes when known.
    pub bytes_total: Option<i64>,
    /// Transfer rate at the last poll.
    pub speed_bytes_per_sec: i64,
    /// Seconds remaining at the last poll.
    pub eta_seconds: Option<i64>,
    /// Failed attempts in the current stage.
    pub retry_count: i64,
    /// Set once cancellation was requested; never cleared.
    pub cancel_requested: bool,
    /// Downloaded file location once completed.
    pub file_path: Option<String>,
    /// Last failure detail.
    pub error: Option<String>,
    /// When the job was submitted.
    pub created_at: String,
    /// When the job last changed.
    pub updated_at: String,
}

impl Job {
    /// Returns the parsed state.
    ///
    /// Falls back to `Pending` if the stored value is invalid.
    #[must_use]
    pub fn state(&self) -> JobState {
        self.state_str.parse().unwrap_or(JobState::Pending)
    }

    /// Returns the classified kind, `None` before classification.
    #[must_use]
    pub fn kind(&self) -> Option<SourceKind> {
        self.kind_str.as_deref().and_then(|kind| kind.parse().ok())
    }

    /// Returns the resolved descriptor, `None` before extraction succeeded.
    #[must_use]
    pub fn resource(&self) -> Option<ResourceDescriptor> {
        let json = self.resource_json.as_deref()?;
        serde_json::from_str(json).ok()
    }

    /// Returns the last recorded progress snapshot.
    #[must_use]
    pub fn progress(&self) -> Progress {
        Progress {
            percent: self.percent,
            bytes_downloaded: u64::try_from(self.bytes_downloaded).unwrap_or(0),
            bytes_total: self.bytes_total.and_then(|v| u64::try_from(v).ok()),
            speed_bytes_per_sec: u64::try_from(self.speed_bytes_per_sec).unwrap_or(0),
            eta_seconds: self.eta_seconds.and_then(|v| u64::try_from(v).ok()),
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job {{ id: {}, locator: {}, state: {} }}",
            self.id,
            self.locator,
            self.state()
        )
    }
}
