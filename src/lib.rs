//! smartdl core library
//!
//! A single-user download orchestrator. Locators (magnet links, file URLs,
//! streaming pages, pages that need rendering) are queued as jobs, classified,
//! turned into a fetchable resource by an extractor, and fetched by an
//! external aria2 daemon. Finished files go to an upload sink.
//!
//! # Architecture
//!
//! - [`classify`] - Syntactic locator classification
//! - [`extract`] - Per-kind extractors and capability probing
//! - [`engine`] - aria2 JSON-RPC client and engine driver
//! - [`retry`] - Bounded, cancellation-aware retry combinator
//! - [`cancel`] - Cooperative job cancellation
//! - [`scheduler`] - Single-slot job state machine
//! - [`job`] - Job model and `SQLite` job store
//! - [`service`] - Submission, query and cancellation API
//! - [`handoff`] - Upload sink and notifier seams
//! - [`config`] - TOML configuration
//! - [`db`] - Database connection and schema management

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod classify;
pub mod config;
pub mod db;
pub mod engine;
pub mod extract;
pub mod handoff;
pub mod job;
pub mod retry;
pub mod scheduler;
pub mod service;
#[cfg(test)]
pub mod test_support;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use cancel::{CancellationCoordinator, JobCancellation};
pub use classify::{SourceKind, classify};
pub use config::{Config, ConfigError};
pub use db::{Database, DbError};
pub use engine::{Aria2Client, DownloadError, EngineDriver, EngineError, EngineRpc};
pub use extract::{ExtractError, Extractor, ExtractorSet};
pub use handoff::{
    CompletionHandoff, LogNotifier, LogUploadSink, Notification, Notifier, UploadSink,
};
pub use job::{
    Job, JobId, JobRepository, JobState, JobStore, JobSummary, Progress, ResourceDescriptor,
    StoreError,
};
pub use retry::{RetryOutcome, RetryPolicy, run_with_retry};
pub use scheduler::{JobOutcome, Scheduler, SchedulerSettings};
pub use service::{JobService, ServiceError};
