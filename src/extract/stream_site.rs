//! Streaming-site pages resolved by a site-extraction backend (yt-dlp).

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::naming::{sanitize_title, suggested_filename};
use super::{ExtractError, Extractor};
use crate::classify::SourceKind;
use crate::job::{Cookie, JobId, ResourceDescriptor};

/// Backend name used in logs and errors.
const YTDLP: &str = "yt-dlp";

/// Extension assumed when the backend reports none.
const DEFAULT_MEDIA_EXT: &str = "mp4";

/// stderr fragments meaning "this page has nothing for me", as opposed to a
/// transient failure.
const UNSUPPORTED_MARKERS: &[&str] = &[
    "unsupported url",
    "no video formats found",
    "no suitable formats",
    "requested format is not available",
];

/// Cookie attributes that are not name/value pairs.
const COOKIE_ATTRIBUTES: &[&str] = &[
    "domain", "path", "expires", "max-age", "secure", "httponly", "samesite",
];

/// What a site backend resolved a page to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaInfo {
    /// Direct media URL.
    pub url: String,
    /// Headers the media host expects.
    pub headers: BTreeMap<String, String>,
    /// Cookies the media host expects.
    pub cookies: Vec<Cookie>,
    /// Raw page title.
    pub title: String,
    /// Container extension.
    pub ext: String,
    /// Exact or approximate size.
    pub declared_size: Option<u64>,
}

impl MediaInfo {
    /// Reads a yt-dlp `--dump-json` document.
    ///
    /// The chosen format is the first of `requested_formats` when present,
    /// else the document itself when it carries a `url`, else the first entry
    /// of `formats`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::NoMedia`] if no media URL can be found.
    pub fn from_ytdlp_json(page_url: &str, info: &Value) -> Result<Self, ExtractError> {
        let format = info
            .get("requested_formats")
            .and_then(Value::as_array)
            .and_then(|formats| formats.first())
            .or_else(|| info.get("url").is_some().then_some(info))
            .or_else(|| {
                info.get("formats")
                    .and_then(Value::as_array)
                    .and_then(|formats| formats.first())
            })
            .ok_or_else(|| ExtractError::no_media(page_url))?;

        let url = format
            .get("url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ExtractError::no_media(page_url))?
            .to_string();

        let headers = format
            .get("http_headers")
            .and_then(Value::as_object)
            .map(|headers| {
                headers
                    .iter()
                    .filter_map(|(name, value)| {
                        value.as_str().map(|value| (name.clone(), value.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let cookies = format
            .get("cookies")
            .or_else(|| info.get("cookies"))
            .and_then(Value::as_str)
            .map(parse_cookie_string)
            .unwrap_or_default();

        let title = info
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("video")
            .to_string();

        let ext = format
            .get("ext")
            .or_else(|| info.get("ext"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MEDIA_EXT)
            .to_string();

        let declared_size = [format, info]
            .iter()
            .flat_map(|source| ["filesize", "filesize_approx"].map(|key| source.get(key)))
            .flatten()
            .find_map(as_size);

        Ok(Self {
            url,
            headers,
            cookies,
            title,
            ext,
            declared_size,
        })
    }
}

fn as_size(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|size| size.is_finite() && *size >= 0.0)
            .map(|size| {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let size = size.round() as u64;
                size
            })
    })
}

/// Parses yt-dlp's `name=value; Domain=...; Path=/; name2=value2` cookie string.
fn parse_cookie_string(raw: &str) -> Vec<Cookie> {
    raw.split(';')
        .filter_map(|part| {
            let (name, value) = part.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() || COOKIE_ATTRIBUTES.contains(&name.to_ascii_lowercase().as_str()) {
                return None;
            }
            Some(Cookie {
                name: name.to_string(),
                value: value.trim().to_string(),
            })
        })
        .collect()
}

/// A site-extraction backend.
#[async_trait]
pub trait SiteBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Resolves a page to its media.
    ///
    /// Returns [`ExtractError::NoMedia`] when the backend does not support the
    /// page, and other errors for transient failures.
    async fn resolve(&self, url: &str) -> Result<MediaInfo, ExtractError>;
}

/// yt-dlp invoked as a subprocess.
#[derive(Debug, Clone)]
pub struct YtDlpBackend {
    command: Vec<String>,
    timeout: Duration,
}

impl YtDlpBackend {
    /// `command` is the program followed by any fixed leading arguments.
    #[must_use]
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl SiteBackend for YtDlpBackend {
    fn name(&self) -> &str {
        YTDLP
    }

    #[instrument(skip(self))]
    async fn resolve(&self, url: &str) -> Result<MediaInfo, ExtractError> {
        let Some((program, leading)) = self.command.split_first() else {
            return Err(ExtractError::backend(YTDLP, "no command configured"));
        };

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(program)
                .args(leading)
                .args(["--dump-json", "--no-download", "--no-warnings", "-f", "best"])
                .arg(url)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ExtractError::timeout(YTDLP, self.timeout))?
        .map_err(|error| {
            ExtractError::backend(YTDLP, format!("failed to run {program}: {error}"))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lowered = stderr.to_ascii_lowercase();
            if UNSUPPORTED_MARKERS.iter().any(|marker| lowered.contains(marker)) {
                debug!(stderr = %stderr.trim(), "backend does not support page");
                return Err(ExtractError::no_media(url));
            }
            return Err(ExtractError::unreachable(
                url,
                format!("{YTDLP} exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        // A playlist prints one document per line; the first entry wins.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
        let info: Value = serde_json::from_str(first_line).map_err(|error| {
            ExtractError::backend(YTDLP, format!("invalid JSON output: {error}"))
        })?;

        MediaInfo::from_ytdlp_json(url, &info)
    }
}

/// Extractor for pages a site backend understands.
#[derive(Clone)]
pub struct StreamSiteExtractor {
    backend: Arc<dyn SiteBackend>,
}

impl std::fmt::Debug for StreamSiteExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSiteExtractor")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl StreamSiteExtractor {
    #[must_use]
    pub fn new(backend: Arc<dyn SiteBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Extractor for StreamSiteExtractor {
    fn kind(&self) -> SourceKind {
        SourceKind::StreamSite
    }

    #[instrument(skip(self))]
    async fn probe(&self, locator: &str) -> Result<bool, ExtractError> {
        match self.backend.resolve(locator).await {
            Ok(_) => Ok(true),
            Err(ExtractError::NoMedia { .. }) => Ok(false),
            Err(ExtractError::Backend { backend, message }) => {
                warn!(backend = %backend, message = %message, "site backend unusable; declining");
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    #[instrument(skip(self, locator))]
    async fn extract(
        &self,
        locator: &str,
        job_id: JobId,
    ) -> Result<ResourceDescriptor, ExtractError> {
        let media = self.backend.resolve(locator).await?;
        let title = sanitize_title(&media.title);
        info!(title = %title, ext = %media.ext, "site backend resolved media");

        Ok(ResourceDescriptor {
            url: media.url,
            headers: media.headers,
            cookies: media.cookies,
            suggested_filename: Some(suggested_filename(&title, Some(&media.ext))),
            title,
            declared_size: media.declared_size,
        })
    }
}
