//! Direct file URLs: metadata from a HEAD request, never the body.

use async_trait::async_trait;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument, warn};

use super::naming::{
    extension_from_content_type, is_attachment, known_extension_from_url, last_path_segment,
    parse_content_disposition, sanitize_title, split_extension, suggested_filename,
};
use super::{ExtractError, Extractor};
use crate::classify::SourceKind;
use crate::job::{JobId, ResourceDescriptor};

/// Content types that indicate a page rather than a file.
const PAGE_CONTENT_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];

/// What a HEAD request revealed about a URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct HeadInfo {
    /// URL after redirects.
    final_url: String,
    content_type: Option<String>,
    content_length: Option<u64>,
    disposition: Option<String>,
    /// The server refused HEAD; only the URL itself is known.
    head_rejected: bool,
}

impl HeadInfo {
    fn is_page(&self) -> bool {
        self.content_type.as_deref().is_some_and(|content_type| {
            let mime = content_type
                .split(';')
                .next()
                .unwrap_or("")
                .trim()
                .to_ascii_lowercase();
            PAGE_CONTENT_TYPES.contains(&mime.as_str())
        })
    }

    fn is_attachment(&self) -> bool {
        self.disposition.as_deref().is_some_and(is_attachment)
    }
}

/// Extractor for plain file URLs.
#[derive(Debug, Clone)]
pub struct DirectExtractor {
    client: Client,
}

impl DirectExtractor {
    /// Creates an extractor using `client` for HEAD probes.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    #[instrument(skip(self))]
    async fn head(&self, url: &str) -> Result<HeadInfo, ExtractError> {
        let response = self.client.head(url).send().await.map_err(|error| {
            if error.is_timeout() {
                ExtractError::unreachable(url, format!("HEAD timed out: {error}"))
            } else {
                ExtractError::unreachable(url, error.to_string())
            }
        })?;

        let status = response.status();
        let final_url = response.url().to_string();
        debug!(status = status.as_u16(), final_url = %final_url, "HEAD response");

        if status.is_server_error() && !head_not_supported(status) {
            return Err(ExtractError::unreachable(url, format!("HTTP {}", status.as_u16())));
        }

        if !status.is_success() {
            // 405/501 and other client errors: the server will not describe the
            // resource, so fall back to what the URL says.
            return Ok(HeadInfo {
                final_url,
                head_rejected: true,
                ..HeadInfo::default()
            });
        }

        let headers = response.headers();
        Ok(HeadInfo {
            final_url,
            content_type: header_str(headers, CONTENT_TYPE.as_str()),
            content_length: header_str(headers, CONTENT_LENGTH.as_str())
                .and_then(|value| value.parse().ok()),
            disposition: header_str(headers, CONTENT_DISPOSITION.as_str()),
            head_rejected: false,
        })
    }
}

fn head_not_supported(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
    )
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl Extractor for DirectExtractor {
    fn kind(&self) -> SourceKind {
        SourceKind::Direct
    }

    #[instrument(skip(self))]
    async fn probe(&self, locator: &str) -> Result<bool, ExtractError> {
        let info = self.head(locator).await?;
        if info.head_rejected {
            return Ok(known_extension_from_url(locator).is_some());
        }
        Ok(info.is_attachment() || !info.is_page())
    }

    #[instrument(skip(self, locator))]
    async fn extract(
        &self,
        locator: &str,
        job_id: JobId,
    ) -> Result<ResourceDescriptor, ExtractError> {
        let info = self.head(locator).await?;
        if info.head_rejected {
            warn!(url = %locator, "HEAD rejected; size unknown");
        }

        let filename = info
            .disposition
            .as_deref()
            .and_then(parse_content_disposition)
            .or_else(|| last_path_segment(&info.final_url))
            .or_else(|| last_path_segment(locator))
            .unwrap_or_default();
        let (stem, extension) = split_extension(&filename);
        let extension = extension.or_else(|| {
            info.content_type
                .as_deref()
                .and_then(extension_from_content_type)
                .map(str::to_string)
        });
        let title = sanitize_title(stem);

        Ok(ResourceDescriptor {
            url: locator.to_string(),
            suggested_filename: Some(suggested_filename(&title, extension.as_deref())),
            title,
            declared_size: info.content_length,
            ..ResourceDescriptor::default()
        })
    }
}
