//! Database row models shared between the daemon and companion tools

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of `recently_played`
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RecentlyPlayedRow {
    pub id: i64,
    pub item_id: String,
    pub title: Option<String>,
    pub played_at: DateTime<Utc>,
}

/// One row of `downloaded_files` (one per resident file)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DownloadedFileRow {
    pub item_id: String,
    pub title: String,
    pub file_path: String,
    pub size_bytes: Option<i64>,
    pub downloaded_at: DateTime<Utc>,
}

/// One row of `playlist_queue`
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlaylistQueueRow {
    pub id: i64,
    pub item_id: String,
    pub title: String,
    pub remote_uri: String,
    pub byte_size: Option<i64>,
    pub added_at: DateTime<Utc>,
}
