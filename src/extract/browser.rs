//! Pages that need a real browser: render, watch the network, pick the video.
//!
//! The renderer is an external headless-browser command. It receives the page
//! URL as its last argument and prints a JSON array of the responses it
//! observed while the page loaded:
//!
//! ```json
//! [{"url": "https://cdn.example.com/v.mp4", "content_type": "video/mp4",
//!   "size": 73400320, "duration": 1312.5}]
//! ```

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, instrument};
use url::Url;

use super::naming::{
    extension_from_content_type, last_path_segment, sanitize_title, split_extension,
    suggested_filename,
};
use super::{ExtractError, Extractor};
use crate::classify::SourceKind;
use crate::job::{JobId, ResourceDescriptor};

/// Backend name used in logs and errors.
const RENDERER: &str = "renderer";

/// Candidates with a known size below this are treated as ads.
pub const MIN_CANDIDATE_SIZE_BYTES: u64 = 500 * 1024;

/// Candidates with a known duration below this are treated as ads.
pub const MIN_CANDIDATE_DURATION_SECS: f64 = 30.0;

/// Content types accepted as video.
const VIDEO_CONTENT_TYPES: &[&str] = &[
    "video/mp4",
    "video/webm",
    "video/ogg",
    "video/x-matroska",
    "video/x-flv",
    "video/x-msvideo",
    "video/quicktime",
    "video/x-m4v",
    "video/x-mpeg",
    "video/3gpp",
    "video/3gpp2",
];

/// URL tokens that mark advertising media.
const AD_KEYWORDS: &[&str] = &[
    "ad",
    "advertisement",
    "promo",
    "preview",
    "teaser",
    "preroll",
    "midroll",
    "overlay",
    "splash",
    "commercial",
    "sponsor",
    "banner",
];

/// One network response seen while rendering a page.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ObservedResponse {
    /// Response URL.
    pub url: String,
    /// `Content-Type` of the response.
    #[serde(default, alias = "content-type")]
    pub content_type: String,
    /// Body size in bytes, when known.
    #[serde(default)]
    pub size: Option<u64>,
    /// Media duration in seconds, when known.
    #[serde(default)]
    pub duration: Option<f64>,
    /// Page title reported alongside the response, when the renderer knows it.
    #[serde(default)]
    pub title: Option<String>,
}

impl ObservedResponse {
    fn is_video(&self) -> bool {
        let content_type = self.content_type.to_ascii_lowercase();
        VIDEO_CONTENT_TYPES
            .iter()
            .any(|video| content_type.contains(video))
    }

    fn is_likely_ad(&self) -> bool {
        if url_tokens(&self.url).any(|token| AD_KEYWORDS.contains(&token.as_str())) {
            return true;
        }
        if self.size.is_some_and(|size| size > 0 && size < MIN_CANDIDATE_SIZE_BYTES) {
            return true;
        }
        self.duration
            .is_some_and(|duration| duration > 0.0 && duration < MIN_CANDIDATE_DURATION_SECS)
    }
}

/// Lowercase alphanumeric tokens of the URL's path and query.
fn url_tokens(url: &str) -> impl Iterator<Item = String> {
    let searchable = Url::parse(url).map_or_else(
        |_| url.to_string(),
        |parsed| format!("{} {}", parsed.path(), parsed.query().unwrap_or("")),
    );
    searchable
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .into_iter()
}

/// Applies the video candidate filter and returns the best survivor.
///
/// Keeps video content types, drops ad-keyword URLs and candidates known to
/// be too small or too short, then prefers the longest and then the largest.
#[must_use]
pub fn select_best_candidate(candidates: &[ObservedResponse]) -> Option<&ObservedResponse> {
    candidates
        .iter()
        .filter(|candidate| {
            if !candidate.is_video() {
                return false;
            }
            if candidate.is_likely_ad() {
                debug!(url = %candidate.url, "dropping likely ad");
                return false;
            }
            true
        })
        .max_by(|a, b| {
            let key = |c: &ObservedResponse| (c.duration.unwrap_or(0.0), c.size.unwrap_or(0));
            let (a_duration, a_size) = key(a);
            let (b_duration, b_size) = key(b);
            a_duration
                .total_cmp(&b_duration)
                .then(a_size.cmp(&b_size))
        })
}

/// Something that renders a page and reports the responses it saw.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Renders `url`.
    async fn render(&self, url: &str) -> Result<Vec<ObservedResponse>, ExtractError>;
}

/// Renderer backed by an external command.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandRenderer {
    /// `command` is the program followed by fixed leading arguments.
    #[must_use]
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl PageRenderer for CommandRenderer {
    #[instrument(skip(self))]
    async fn render(&self, url: &str) -> Result<Vec<ObservedResponse>, ExtractError> {
        let Some((program, leading)) = self.command.split_first() else {
            return Err(ExtractError::backend(RENDERER, "no command configured"));
        };

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(program)
                .args(leading)
                .arg(url)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ExtractError::timeout(RENDERER, self.timeout))?
        .map_err(|error| {
            ExtractError::backend(RENDERER, format!("failed to run {program}: {error}"))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::unreachable(
                url,
                format!("{RENDERER} exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        serde_json::from_slice(&output.stdout).map_err(|error| {
            ExtractError::backend(RENDERER, format!("invalid JSON output: {error}"))
        })
    }
}

/// Extractor for pages only a browser can resolve. Accepts any web page.
#[derive(Clone)]
pub struct BrowserExtractor {
    renderer: Arc<dyn PageRenderer>,
}

impl std::fmt::Debug for BrowserExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserExtractor").finish_non_exhaustive()
    }
}

impl BrowserExtractor {
    #[must_use]
    pub fn new(renderer: Arc<dyn PageRenderer>) -> Self {
        Self { renderer }
    }
}

#[async_trait]
impl Extractor for BrowserExtractor {
    fn kind(&self) -> SourceKind {
        SourceKind::BrowserCrawl
    }

    async fn probe(&self, locator: &str) -> Result<bool, ExtractError> {
        Ok(Url::parse(locator.trim())
            .is_ok_and(|url| matches!(url.scheme(), "http" | "https")))
    }

    #[instrument(skip(self, locator))]
    async fn extract(
        &self,
        locator: &str,
        job_id: JobId,
    ) -> Result<ResourceDescriptor, ExtractError> {
        let observed = self.renderer.render(locator).await?;
        let Some(best) = select_best_candidate(&observed) else {
            info!(candidates = observed.len(), "no video survived filtering");
            return Err(ExtractError::no_media(locator));
        };

        let media_segment = last_path_segment(&best.url).unwrap_or_default();
        let (media_stem, media_ext) = split_extension(&media_segment);
        let raw_title = best
            .title
            .clone()
            .or_else(|| last_path_segment(locator))
            .unwrap_or_else(|| media_stem.to_string());
        let title = sanitize_title(&raw_title);
        let extension = media_ext.or_else(|| {
            extension_from_content_type(&best.content_type).map(str::to_string)
        });
        info!(url = %best.url, title = %title, "selected video candidate");

        Ok(ResourceDescriptor {
            url: best.url.clone(),
            suggested_filename: Some(suggested_filename(&title, extension.as_deref())),
            title,
            declared_size: best.size,
            ..ResourceDescriptor::default()
        })
    }
}
