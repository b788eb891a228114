//! Locator classification.
//!
//! [`classify`] is the purely syntactic first half of the Classifying stage:
//! it recognizes magnet links and well-formed web URLs. Telling a direct file
//! apart from a streaming page or a page that needs a browser is left to the
//! extractors' capability probes (see [`crate::extract::ExtractorSet::probe_kind`]),
//! never to a table of known domains.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

/// Maximum locator length accepted (standard browser URL limit).
pub const MAX_LOCATOR_LENGTH: usize = 2000;

/// Prefix that identifies a magnet locator.
const MAGNET_PREFIX: &str = "magnet:?";

/// Closed classification of a locator's source type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Magnet link, fetched natively by the engine.
    Torrent,
    /// Plain file behind an HTTP(S) URL.
    Direct,
    /// Page whose media a site-extraction backend can resolve.
    StreamSite,
    /// Page that has to be rendered to discover its media.
    BrowserCrawl,
    /// Matches no recognized locator syntax.
    Unknown,
}

impl SourceKind {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Torrent => "torrent",
            Self::Direct => "direct",
            Self::StreamSite => "stream_site",
            Self::BrowserCrawl => "browser_crawl",
            Self::Unknown => "unknown",
        }
    }

    /// True for kinds reached through an `http(s)://` locator.
    #[must_use]
    pub fn is_web(&self) -> bool {
        matches!(self, Self::Direct | Self::StreamSite | Self::BrowserCrawl)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "torrent" => Ok(Self::Torrent),
            "direct" => Ok(Self::Direct),
            "stream_site" => Ok(Self::StreamSite),
            "browser_crawl" => Ok(Self::BrowserCrawl),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("invalid source kind: {s}")),
        }
    }
}

/// Classifies a raw locator by syntax alone.
///
/// Returns [`SourceKind::Torrent`] for magnet links, [`SourceKind::Direct`] for
/// any well-formed `http`/`https` URL with a host, and [`SourceKind::Unknown`]
/// otherwise. Pure and total.
///
/// # Examples
///
/// ```
/// use smartdl_core::{classify, SourceKind};
///
/// assert_eq!(classify("magnet:?xt=urn:btih:abc&dn=Movie"), SourceKind::Torrent);
/// assert_eq!(classify("https://example.com/video"), SourceKind::Direct);
/// assert_eq!(classify("ftp://example.com/file"), SourceKind::Unknown);
/// ```
#[instrument(skip(locator), fields(locator_len = locator.len()))]
#[must_use]
pub fn classify(locator: &str) -> SourceKind {
    let locator = locator.trim();
    if locator.is_empty() || locator.len() > MAX_LOCATOR_LENGTH {
        return SourceKind::Unknown;
    }

    if is_magnet(locator) {
        debug!("magnet locator");
        return SourceKind::Torrent;
    }

    match Url::parse(locator) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {
            debug!(host = url.host_str().unwrap_or_default(), "web locator");
            SourceKind::Direct
        }
        Ok(url) => {
            debug!(scheme = url.scheme(), "unsupported locator scheme");
            SourceKind::Unknown
        }
        Err(error) => {
            debug!(%error, "locator is not a URL");
            SourceKind::Unknown
        }
    }
}

/// True if the locator uses magnet syntax with at least one parameter.
#[must_use]
pub fn is_magnet(locator: &str) -> bool {
    let Some(rest) = locator.get(..MAGNET_PREFIX.len()) else {
        return false;
    };
    rest.eq_ignore_ascii_case(MAGNET_PREFIX) && locator.len() > MAGNET_PREFIX.len()
}

/// Returns the display name (`dn`) carried by a magnet link, if any.
#[must_use]
pub fn magnet_display_name(locator: &str) -> Option<String> {
    let url = Url::parse(locator.trim()).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "dn")
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_magnet_is_torrent() {
        assert_eq!(
            classify("magnet:?xt=urn:btih:ABCDEF0123456789&dn=Movie"),
            SourceKind::Torrent
        );
    }

    #[test]
    fn test_classify_magnet_prefix_case_insensitive() {
        assert_eq!(classify("MAGNET:?xt=urn:btih:abc"), SourceKind::Torrent);
    }

    #[test]
    fn test_classify_bare_magnet_prefix_is_unknown() {
        assert_eq!(classify("magnet:?"), SourceKind::Unknown);
    }

    #[test]
    fn test_classify_http_and_https_default_to_direct() {
        assert_eq!(classify("http://example.com/a.mp4"), SourceKind::Direct);
        assert_eq!(classify("https://videos.example.org/watch?v=1"), SourceKind::Direct);
    }

    #[test]
    fn test_classify_never_consults_domain_lists() {
        // Well-known streaming hosts get no special treatment from syntax alone.
        assert_eq!(
            classify("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            SourceKind::Direct
        );
        assert_eq!(
            classify("https://brand-new-site.example/watch/42"),
            SourceKind::Direct
        );
    }

    #[test]
    fn test_classify_trims_whitespace() {
        assert_eq!(classify("  https://example.com/file.zip \n"), SourceKind::Direct);
    }

    #[test]
    fn test_classify_rejects_other_syntax() {
        assert_eq!(classify(""), SourceKind::Unknown);
        assert_eq!(classify("not a url"), SourceKind::Unknown);
        assert_eq!(classify("ftp://example.com/file.iso"), SourceKind::Unknown);
        assert_eq!(classify("file:///etc/passwd"), SourceKind::Unknown);
        assert_eq!(classify("https://"), SourceKind::Unknown);
    }

    #[test]
    fn test_classify_rejects_overlong_locator() {
        let long = format!("https://example.com/{}", "a".repeat(MAX_LOCATOR_LENGTH));
        assert_eq!(classify(&long), SourceKind::Unknown);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let locator = "https://example.com/stream/7";
        assert_eq!(classify(locator), classify(locator));
    }

    #[test]
    fn test_magnet_display_name_decodes_dn() {
        let name = magnet_display_name("magnet:?xt=urn:btih:abc&dn=Big+Buck%20Bunny");
        assert_eq!(name.as_deref(), Some("Big Buck Bunny"));
    }

    #[test]
    fn test_magnet_display_name_missing() {
        assert_eq!(magnet_display_name("magnet:?xt=urn:btih:abc"), None);
    }

    #[test]
    fn test_source_kind_roundtrip_strings() {
        for kind in [
            SourceKind::Torrent,
            SourceKind::Direct,
            SourceKind::StreamSite,
            SourceKind::BrowserCrawl,
            SourceKind::Unknown,
        ] {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
        assert!("ytdlp".parse::<SourceKind>().is_err());
    }
}
