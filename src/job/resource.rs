//! Resolved resource descriptor handed from extraction to the engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single cookie the engine must send with the transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
}

/// Everything the engine needs to fetch one resource.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Fetchable URL (for torrents, the magnet link itself).
    pub url: String,
    /// Extra HTTP request headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Cookies required by the origin.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<Cookie>,
    /// Human-readable title reported by the source.
    #[serde(default)]
    pub title: String,
    /// Size announced before transfer, if any.
    #[serde(default)]
    pub declared_size: Option<u64>,
    /// Output filename the engine should use, if any.
    #[serde(default)]
    pub suggested_filename: Option<String>,
}

impl ResourceDescriptor {
    /// Creates a descriptor with only a URL and title.
    #[must_use]
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    /// Renders the cookies as a single `Cookie` header value.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|cookie| format!("{}={}", cookie.name, cookie.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
