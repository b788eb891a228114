//! Outbound collaborators: the upload sink that receives finished files and
//! the notifier that reports failures and skips.
//!
//! The crate ships logging implementations plus channel-backed ones for
//! embedding the scheduler in a larger process.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::job::JobId;

/// A finished download ready for upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionHandoff {
    pub job_id: JobId,
    pub file_path: PathBuf,
    pub declared_title: String,
}

/// User-facing outcome worth a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Failed {
        job_id: JobId,
        locator: String,
        error: String,
    },
    SkippedTooLarge {
        job_id: JobId,
        locator: String,
        declared_size: u64,
        limit: u64,
    },
}

impl Notification {
    #[must_use]
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Failed { job_id, .. } | Self::SkippedTooLarge { job_id, .. } => *job_id,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed {
                job_id,
                locator,
                error,
            } => write!(f, "job {job_id} failed ({locator}): {error}"),
            Self::SkippedTooLarge {
                job_id,
                locator,
                declared_size,
                limit,
            } => write!(
                f,
                "job {job_id} skipped ({locator}): \
                 {declared_size} bytes exceeds the {limit} byte limit"
            ),
        }
    }
}

/// Receives completed files.
#[async_trait]
pub trait UploadSink: Send + Sync {
    async fn deliver(&self, handoff: CompletionHandoff);
}

/// Receives failure and skip notices.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Logs completions; used when no uploader is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogUploadSink;

#[async_trait]
impl UploadSink for LogUploadSink {
    async fn deliver(&self, handoff: CompletionHandoff) {
        info!(
            job_id = handoff.job_id,
            path = %handoff.file_path.display(),
            title = %handoff.declared_title,
            "download ready for upload"
        );
    }
}

/// Logs notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) {
        warn!(job_id = notification.job_id(), "{notification}");
    }
}

/// Forwards completions into a channel.
#[derive(Debug, Clone)]
pub struct ChannelUploadSink {
    sender: mpsc::UnboundedSender<CompletionHandoff>,
}

impl ChannelUploadSink {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CompletionHandoff>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl UploadSink for ChannelUploadSink {
    async fn deliver(&self, handoff: CompletionHandoff) {
        if self.sender.send(handoff).is_err() {
            warn!("upload receiver dropped; completion not delivered");
        }
    }
}

/// Forwards notifications into a channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            warn!("notification receiver dropped");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_display() {
        let failed = Notification::Failed {
            job_id: 4,
            locator: "https://example.com/a".to_string(),
            error: "timed out after 15s: HEAD".to_string(),
        };
        assert_eq!(
            failed.to_string(),
            "job 4 failed (https://example.com/a): timed out after 15s: HEAD"
        );
        let skipped = Notification::SkippedTooLarge {
            job_id: 5,
            locator: "https://example.com/b".to_string(),
            declared_size: 3,
            limit: 2,
        };
        assert_eq!(skipped.job_id(), 5);
        assert!(skipped.to_string().contains("exceeds the 2 byte limit"));
    }

    #[test]
    fn test_notification_serializes_with_kind_tag() {
        let json = serde_json::to_value(Notification::SkippedTooLarge {
            job_id: 1,
            locator: "x".to_string(),
            declared_size: 10,
            limit: 5,
        })
        .unwrap();
        assert_eq!(json["kind"], "skipped_too_large");
        assert_eq!(json["declared_size"], 10);
    }

    #[tokio::test]
    async fn test_channel_collaborators_forward() {
        let (sink, mut uploads) = ChannelUploadSink::new();
        let (notifier, mut notes) = ChannelNotifier::new();
        sink.deliver(CompletionHandoff {
            job_id: 1,
            file_path: PathBuf::from("/data/a.mp4"),
            declared_title: "A".to_string(),
        })
        .await;
        notifier
            .notify(Notification::Failed {
                job_id: 2,
                locator: "x".to_string(),
                error: "boom".to_string(),
            })
            .await;
        assert_eq!(uploads.recv().await.unwrap().job_id, 1);
        assert_eq!(notes.recv().await.unwrap().job_id(), 2);
    }

    #[tokio::test]
    async fn test_channel_sink_tolerates_dropped_receiver() {
        let (sink, uploads) = ChannelUploadSink::new();
        drop(uploads);
        sink.deliver(CompletionHandoff {
            job_id: 1,
            file_path: PathBuf::from("/x"),
            declared_title: String::new(),
        })
        .await;
    }
}
