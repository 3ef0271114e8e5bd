//! Remote item transfer
//!
//! A [`Downloader`] streams one remote item to a local staging path. It never
//! buffers the whole body in memory, and it removes the partial file on any
//! failure so the cache never sees half-written data.

pub mod archive;

pub use archive::ArchiveOrgDownloader;

use crate::catalog::MediaItem;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Structured transfer failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DownloadError {
    /// Connection, TLS or body read failure
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// Local write failure
    #[error("disk error: {0}")]
    Disk(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Known or streamed size exceeds the per-item cap
    #[error("item too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    /// Remote URI could not be turned into a downloadable file
    #[error("cannot resolve item: {0}")]
    Unresolvable(String),

    /// Item is still inside its retry backoff window
    #[error("retry backoff active for {0:?}")]
    Backoff(Duration),
}

impl From<std::io::Error> for DownloadError {
    fn from(e: std::io::Error) -> Self {
        DownloadError::Disk(e.to_string())
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => DownloadError::HttpStatus(status.as_u16()),
            None => DownloadError::Transport(e.to_string()),
        }
    }
}

/// Bounds applied to a single transfer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferLimits {
    /// Abort once more than this many bytes have been streamed
    pub max_bytes: u64,
    /// Whole-transfer deadline, metadata resolution included
    pub timeout: Duration,
}

/// Fetches one remote item to a local path
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Stream `item` into `dest`, returning the number of bytes written
    ///
    /// On error `dest` does not exist.
    async fn fetch(
        &self,
        item: &MediaItem,
        dest: &Path,
        limits: TransferLimits,
    ) -> Result<u64, DownloadError>;
}

/// Plain HTTP(S) downloader: `remote_uri` is the file itself
#[derive(Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpDownloader {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("loopcast/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Stream `url` into `dest`, enforcing `limits`
    pub async fn fetch_url(
        &self,
        url: &str,
        dest: &Path,
        limits: TransferLimits,
    ) -> Result<u64, DownloadError> {
        let result = match tokio::time::timeout(limits.timeout, self.stream_to(url, dest, limits))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(DownloadError::Timeout(limits.timeout)),
        };

        if let Err(e) = &result {
            warn!(url, error = %e, "Transfer failed, removing partial file");
            remove_partial(dest).await;
        }
        result
    }

    async fn stream_to(
        &self,
        url: &str,
        dest: &Path,
        limits: TransferLimits,
    ) -> Result<u64, DownloadError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus(status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            if length > limits.max_bytes {
                return Err(DownloadError::TooLarge {
                    size: length,
                    limit: limits.max_bytes,
                });
            }
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if written > limits.max_bytes {
                return Err(DownloadError::TooLarge {
                    size: written,
                    limit: limits.max_bytes,
                });
            }
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        file.sync_all().await?;

        debug!(url, bytes = written, "Transfer complete");
        Ok(written)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(
        &self,
        item: &MediaItem,
        dest: &Path,
        limits: TransferLimits,
    ) -> Result<u64, DownloadError> {
        self.fetch_url(&item.remote_uri, dest, limits).await
    }
}

/// Remove a partial file, ignoring "not found"
pub(crate) async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial file"),
    }
}
