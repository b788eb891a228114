//! Magnet links pass straight through to the engine.

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::naming::sanitize_title;
use super::{ExtractError, Extractor};
use crate::classify::{SourceKind, is_magnet, magnet_display_name};
use crate::job::{JobId, ResourceDescriptor};

/// Title used when a magnet carries no display name.
const DEFAULT_TORRENT_TITLE: &str = "Torrent";

/// Extractor for magnet locators.
#[derive(Debug, Default, Clone, Copy)]
pub struct TorrentExtractor;

impl TorrentExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Extractor for TorrentExtractor {
    fn kind(&self) -> SourceKind {
        SourceKind::Torrent
    }

    async fn probe(&self, locator: &str) -> Result<bool, ExtractError> {
        Ok(is_magnet(locator.trim()))
    }

    #[instrument(skip(self, locator))]
    async fn extract(
        &self,
        locator: &str,
        job_id: JobId,
    ) -> Result<ResourceDescriptor, ExtractError> {
        let locator = locator.trim();
        if !is_magnet(locator) {
            return Err(ExtractError::Malformed(format!(
                "not a magnet link: {locator}"
            )));
        }

        let title =
            magnet_display_name(locator).unwrap_or_else(|| DEFAULT_TORRENT_TITLE.to_string());
        let title = sanitize_title(&title);
        debug!(title = %title, "magnet resolved");

        // The engine names torrent payloads itself, so no output filename.
        Ok(ResourceDescriptor::new(locator, title))
    }
}
