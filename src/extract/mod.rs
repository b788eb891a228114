//! Resource extraction: turning a classified locator into something the
//! engine can fetch.
//!
//! # Architecture
//!
//! - [`Extractor`] - Async trait with a capability probe and an extraction step
//! - [`ExtractorSet`] - Closed dispatch table, one extractor per [`SourceKind`]
//! - [`TorrentExtractor`] - Magnet passthrough
//! - [`DirectExtractor`] - Metadata-only HEAD probe
//! - [`StreamSiteExtractor`] - Site-extraction backend (yt-dlp)
//! - [`BrowserExtractor`] - Headless renderer with a video candidate filter
//!
//! Extractors never transfer the payload itself.
//!
//! # Example
//!
//! ```no_run
//! use smartdl_core::extract::ExtractorSet;
//! use smartdl_core::config::Config;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let extractors = ExtractorSet::from_config(&Config::default())?;
//! let kind = extractors.probe_kind("https://example.com/file.zip").await?;
//! let resource = extractors.extract(kind, "https://example.com/file.zip", 1).await?;
//! println!("{}", resource.url);
//! # Ok(())
//! # }
//! ```

mod browser;
mod direct;
mod http_client;
pub mod naming;
mod stream_site;
mod torrent;

pub use browser::{
    BrowserExtractor, CommandRenderer, MIN_CANDIDATE_DURATION_SECS, MIN_CANDIDATE_SIZE_BYTES,
    ObservedResponse, PageRenderer, select_best_candidate,
};
pub use direct::DirectExtractor;
pub use http_client::build_probe_client;
pub use stream_site::{MediaInfo, SiteBackend, StreamSiteExtractor, YtDlpBackend};
pub use torrent::TorrentExtractor;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::classify::{SourceKind, classify};
use crate::config::Config;
use crate::job::{JobId, ResourceDescriptor};
use crate::retry::RetryableError;

/// Why extraction (or capability probing) failed.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// The page or file could not be reached.
    #[error("unreachable: {url}: {message}")]
    Unreachable {
        /// Locator that failed.
        url: String,
        /// Transport or status detail.
        message: String,
    },

    /// A probe or backend exceeded its time budget.
    #[error("timed out after {}s: {operation}", .timeout.as_secs())]
    Timeout {
        /// What was running.
        operation: String,
        /// Budget that was exceeded.
        timeout: Duration,
    },

    /// The source resolved but exposed nothing fetchable.
    #[error("no fetchable media found at {url}")]
    NoMedia {
        /// Locator that was inspected.
        url: String,
    },

    /// The locator cannot be handled by this extractor.
    #[error("malformed locator: {0}")]
    Malformed(String),

    /// An extraction backend failed or returned unusable output.
    #[error("{backend} failed: {message}")]
    Backend {
        /// Backend name.
        backend: String,
        /// Failure detail.
        message: String,
    },

    /// The job was cancelled while the stage was running.
    #[error("cancelled")]
    Cancelled,
}

impl ExtractError {
    /// Creates an [`ExtractError::Unreachable`].
    #[must_use]
    pub fn unreachable(url: &str, message: impl Into<String>) -> Self {
        Self::Unreachable {
            url: url.to_string(),
            message: message.into(),
        }
    }

    /// Creates an [`ExtractError::Timeout`].
    #[must_use]
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Creates an [`ExtractError::NoMedia`].
    #[must_use]
    pub fn no_media(url: &str) -> Self {
        Self::NoMedia {
            url: url.to_string(),
        }
    }

    /// Creates an [`ExtractError::Backend`].
    #[must_use]
    pub fn backend(backend: &str, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.to_string(),
            message: message.into(),
        }
    }
}

impl RetryableError for ExtractError {
    fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    fn is_retryable(&self) -> bool {
        !matches!(self, Self::Malformed(_))
    }
}

/// A per-kind resolver from locator to [`ResourceDescriptor`].
#[async_trait]
pub trait Extractor: Send + Sync {
    /// The kind this extractor serves.
    fn kind(&self) -> SourceKind;

    /// Reports whether this extractor can handle `locator`.
    ///
    /// Network failures surface as errors so the caller can retry.
    async fn probe(&self, locator: &str) -> Result<bool, ExtractError>;

    /// Resolves `locator` into a fetchable resource.
    async fn extract(
        &self,
        locator: &str,
        job_id: JobId,
    ) -> Result<ResourceDescriptor, ExtractError>;
}

/// One extractor per extractable kind.
#[derive(Clone)]
pub struct ExtractorSet {
    torrent: Arc<dyn Extractor>,
    direct: Arc<dyn Extractor>,
    stream_site: Arc<dyn Extractor>,
    browser: Arc<dyn Extractor>,
}

impl std::fmt::Debug for ExtractorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorSet").finish_non_exhaustive()
    }
}

impl ExtractorSet {
    /// Assembles a set from explicit extractors.
    #[must_use]
    pub fn new(
        torrent: Arc<dyn Extractor>,
        direct: Arc<dyn Extractor>,
        stream_site: Arc<dyn Extractor>,
        browser: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            torrent,
            direct,
            stream_site,
            browser,
        }
    }

    /// Builds the production set: HEAD probing, yt-dlp and the configured renderer.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Backend`] if the probe HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, ExtractError> {
        let client = build_probe_client(config.probe_connect_timeout(), config.probe_timeout())?;
        let backend = YtDlpBackend::new(
            config.extract.ytdlp_command.clone(),
            config.backend_timeout(),
        );
        let renderer = CommandRenderer::new(
            config.extract.renderer_command.clone(),
            config.backend_timeout(),
        );

        Ok(Self::new(
            Arc::new(TorrentExtractor::new()),
            Arc::new(DirectExtractor::new(client)),
            Arc::new(StreamSiteExtractor::new(Arc::new(backend))),
            Arc::new(BrowserExtractor::new(Arc::new(renderer))),
        ))
    }

    /// Returns the extractor for `kind`; `Unknown` has none.
    #[must_use]
    pub fn for_kind(&self, kind: SourceKind) -> Option<&dyn Extractor> {
        match kind {
            SourceKind::Torrent => Some(self.torrent.as_ref()),
            SourceKind::Direct => Some(self.direct.as_ref()),
            SourceKind::StreamSite => Some(self.stream_site.as_ref()),
            SourceKind::BrowserCrawl => Some(self.browser.as_ref()),
            SourceKind::Unknown => None,
        }
    }

    /// Classifies a locator fully: syntax first, then capability probes.
    ///
    /// Web locators are offered to the Direct, `StreamSite` and `BrowserCrawl`
    /// extractors in that order; the first that accepts wins. Returns
    /// [`SourceKind::Unknown`] when nothing accepts.
    ///
    /// # Errors
    ///
    /// Propagates probe failures (retryable).
    #[instrument(skip(self, locator))]
    pub async fn probe_kind(&self, locator: &str) -> Result<SourceKind, ExtractError> {
        let syntactic = classify(locator);
        if !syntactic.is_web() {
            return Ok(syntactic);
        }

        let locator = locator.trim();
        for extractor in [&self.direct, &self.stream_site, &self.browser] {
            if extractor.probe(locator).await? {
                let kind = extractor.kind();
                info!(kind = %kind, "capability probe accepted locator");
                return Ok(kind);
            }
            debug!(kind = %extractor.kind(), "capability probe declined");
        }

        Ok(SourceKind::Unknown)
    }

    /// Runs the extractor for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Malformed`] for [`SourceKind::Unknown`], or
    /// whatever the extractor reports.
    #[instrument(skip(self, locator), fields(kind = %kind))]
    pub async fn extract(
        &self,
        kind: SourceKind,
        locator: &str,
        job_id: JobId,
    ) -> Result<ResourceDescriptor, ExtractError> {
        let Some(extractor) = self.for_kind(kind) else {
            return Err(ExtractError::Malformed(format!(
                "no extractor for kind {kind}"
            )));
        };
        extractor.extract(locator.trim(), job_id).await
    }
}
