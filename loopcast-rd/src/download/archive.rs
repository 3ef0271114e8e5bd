//! archive.org item resolution
//!
//! Catalog entries point at `https://archive.org/metadata/{identifier}`.
//! The resolver fetches that document, picks the smallest `.mp4` that fits
//! the per-item cap and streams it from
//! `https://archive.org/download/{identifier}/{name}`.

use super::{remove_partial, DownloadError, Downloader, HttpDownloader, TransferLimits};
use crate::catalog::MediaItem;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const METADATA_PREFIX: &str = "https://archive.org/metadata/";
const DOWNLOAD_BASE: &str = "https://archive.org/download";
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ItemMetadata {
    #[serde(default)]
    files: Vec<FileEntry>,
}

/// One entry of the metadata `files` array
#[derive(Debug, Clone, Deserialize)]
pub struct FileEntry {
    pub name: String,
    /// archive.org reports sizes as strings
    #[serde(default)]
    pub size: Option<serde_json::Value>,
}

impl FileEntry {
    fn size_bytes(&self) -> Option<u64> {
        match self.size.as_ref()? {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => n.as_u64(),
            _ => None,
        }
    }
}

/// Smallest `.mp4` entry whose size is known and within `max_bytes`
pub fn select_smallest_mp4(files: &[FileEntry], max_bytes: u64) -> Option<(String, u64)> {
    files
        .iter()
        .filter(|f| f.name.to_lowercase().ends_with(".mp4"))
        .filter_map(|f| f.size_bytes().map(|size| (f.name.clone(), size)))
        .filter(|(_, size)| *size > 0 && *size <= max_bytes)
        .min_by_key(|(_, size)| *size)
}

/// Download URL for a file inside an item
pub fn download_url(identifier: &str, file_name: &str) -> String {
    format!("{}/{}/{}", DOWNLOAD_BASE, identifier, file_name)
}

/// Downloader that resolves archive.org metadata URIs first
///
/// URIs that are not metadata URLs are fetched as-is.
#[derive(Clone, Default)]
pub struct ArchiveOrgDownloader {
    http: HttpDownloader,
}

impl ArchiveOrgDownloader {
    pub fn new(http: HttpDownloader) -> Self {
        Self { http }
    }

    async fn resolve(
        &self,
        identifier: &str,
        metadata_url: &str,
        max_bytes: u64,
    ) -> Result<(String, u64), DownloadError> {
        let response = self
            .http
            .client()
            .get(metadata_url)
            .timeout(METADATA_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus(status.as_u16()));
        }

        let metadata: ItemMetadata = response
            .json()
            .await
            .map_err(|e| DownloadError::Unresolvable(format!("bad metadata: {}", e)))?;

        let (name, size) = select_smallest_mp4(&metadata.files, max_bytes).ok_or_else(|| {
            DownloadError::Unresolvable(format!("no MP4 within {} bytes", max_bytes))
        })?;

        debug!(identifier, file = %name, size, "Resolved archive.org file");
        Ok((download_url(identifier, &name), size))
    }
}

#[async_trait]
impl Downloader for ArchiveOrgDownloader {
    async fn fetch(
        &self,
        item: &MediaItem,
        dest: &Path,
        limits: TransferLimits,
    ) -> Result<u64, DownloadError> {
        let Some(identifier) = item.remote_uri.strip_prefix(METADATA_PREFIX) else {
            return self.http.fetch_url(&item.remote_uri, dest, limits).await;
        };

        let resolved = tokio::time::timeout(
            limits.timeout,
            self.resolve(identifier, &item.remote_uri, limits.max_bytes),
        )
        .await
        .unwrap_or(Err(DownloadError::Timeout(limits.timeout)));

        let (url, size) = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                remove_partial(dest).await;
                return Err(e);
            }
        };

        info!(item_id = %item.id, url = %url, size, "Downloading from archive.org");
        self.http.fetch_url(&url, dest, limits).await
    }
}
