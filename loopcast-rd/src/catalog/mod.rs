//! Catalog access
//!
//! The catalog is a read-only collaborator: it lists candidate items and
//! picks a random one while excluding a given id set. [`SqliteCatalog`]
//! reads the crawler's `media` table; tests substitute in-memory fakes.

pub mod sqlite;

pub use sqlite::SqliteCatalog;

use crate::error::Result;
use async_trait::async_trait;
use loopcast_common::db::PlaylistQueueRow;
use serde::{Deserialize, Serialize};

/// One playable catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub title: String,
    /// Where the downloader fetches the item from
    pub remote_uri: String,
    /// Known or estimated size
    pub byte_size: Option<u64>,
    /// Unknown until probed
    pub duration_secs: Option<f64>,
}

impl From<PlaylistQueueRow> for MediaItem {
    fn from(row: PlaylistQueueRow) -> Self {
        Self {
            id: row.item_id,
            title: row.title,
            remote_uri: row.remote_uri,
            byte_size: row.byte_size.and_then(|s| u64::try_from(s).ok()),
            duration_secs: None,
        }
    }
}

/// Listing filter; every field narrows the result when set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFilter {
    pub mediatype: Option<String>,
    /// Substring match over title, description and creator
    pub search: Option<String>,
    pub year: Option<i64>,
    pub max_item_bytes: Option<u64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Read-only catalog provider
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Items matching `filter`
    async fn list(&self, filter: &CatalogFilter) -> Result<Vec<MediaItem>>;

    /// A random playable item whose id is not in `exclude_ids`
    ///
    /// `Ok(None)` means no candidate is left after exclusion.
    async fn random(&self, exclude_ids: &[String]) -> Result<Option<MediaItem>>;

    /// Look up a single item
    async fn get(&self, id: &str) -> Result<Option<MediaItem>>;
}
