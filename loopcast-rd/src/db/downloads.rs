//! Downloaded file registry
//!
//! One row per resident file, keyed by item id.

use super::{persistence_error, RotationState, WRITE_LOCK_WAIT_MS};
use crate::error::Result;
use crate::retry::retry_on_lock;
use chrono::Utc;
use loopcast_common::db::DownloadedFileRow;
use std::path::Path;

impl RotationState {
    /// Record a resident file, replacing any earlier row for the same item
    pub async fn add_downloaded_video(
        &self,
        item_id: &str,
        title: &str,
        file_path: &Path,
        size_bytes: Option<u64>,
    ) -> Result<()> {
        let path = file_path.to_string_lossy().to_string();
        let size = size_bytes.map(|s| s.min(i64::MAX as u64) as i64);
        let _guard = self.writer().await;

        retry_on_lock("add_downloaded_video", WRITE_LOCK_WAIT_MS, || {
            sqlx::query(
                r#"
                INSERT INTO downloaded_files (item_id, title, file_path, size_bytes, downloaded_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(item_id) DO UPDATE SET
                    title = excluded.title,
                    file_path = excluded.file_path,
                    size_bytes = excluded.size_bytes,
                    downloaded_at = excluded.downloaded_at
                "#,
            )
            .bind(item_id)
            .bind(title)
            .bind(&path)
            .bind(size)
            .bind(Utc::now())
            .execute(self.pool())
        })
        .await
        .map_err(persistence_error("add_downloaded_video"))?;

        Ok(())
    }

    /// Update the path of a resident file after it moved between slots
    pub async fn move_downloaded_video(&self, item_id: &str, file_path: &Path) -> Result<()> {
        let path = file_path.to_string_lossy().to_string();
        let _guard = self.writer().await;

        retry_on_lock("move_downloaded_video", WRITE_LOCK_WAIT_MS, || {
            sqlx::query("UPDATE downloaded_files SET file_path = ? WHERE item_id = ?")
                .bind(&path)
                .bind(item_id)
                .execute(self.pool())
        })
        .await
        .map_err(persistence_error("move_downloaded_video"))?;

        Ok(())
    }

    /// Forget a file that is no longer resident
    pub async fn remove_downloaded_video(&self, item_id: &str) -> Result<bool> {
        let _guard = self.writer().await;

        let result = retry_on_lock("remove_downloaded_video", WRITE_LOCK_WAIT_MS, || {
            sqlx::query("DELETE FROM downloaded_files WHERE item_id = ?")
                .bind(item_id)
                .execute(self.pool())
        })
        .await
        .map_err(persistence_error("remove_downloaded_video"))?;

        Ok(result.rows_affected() > 0)
    }

    /// Drop every row whose path is not in `resident`
    pub async fn prune_downloaded_videos(&self, resident: &[&Path]) -> Result<u64> {
        let keep: Vec<String> = resident
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        let rows = self.downloaded_videos().await?;
        let mut removed = 0;

        for row in rows.into_iter().filter(|r| !keep.contains(&r.file_path)) {
            if self.remove_downloaded_video(&row.item_id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// All registry rows, newest first
    pub async fn downloaded_videos(&self) -> Result<Vec<DownloadedFileRow>> {
        let rows = sqlx::query_as::<_, DownloadedFileRow>(
            r#"
            SELECT item_id, title, file_path, size_bytes, downloaded_at
            FROM downloaded_files
            ORDER BY downloaded_at DESC
            "#,
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn setup_state() -> RotationState {
        let pool = loopcast_common::db::init_memory_database().await.unwrap();
        RotationState::new(pool)
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_item() {
        let state = setup_state().await;
        let next = PathBuf::from("/media/next_stream.mp4");
        let current = PathBuf::from("/media/current_stream.mp4");

        state
            .add_downloaded_video("item-1", "First", &next, Some(10))
            .await
            .unwrap();
        state
            .add_downloaded_video("item-1", "First (again)", &current, Some(12))
            .await
            .unwrap();

        let rows = state.downloaded_videos().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "First (again)");
        assert_eq!(rows[0].file_path, current.to_string_lossy());
        assert_eq!(rows[0].size_bytes, Some(12));
    }

    #[tokio::test]
    async fn test_move_and_remove() {
        let state = setup_state().await;
        let next = PathBuf::from("/media/next_stream.mp4");
        let current = PathBuf::from("/media/current_stream.mp4");

        state
            .add_downloaded_video("item-1", "First", &next, None)
            .await
            .unwrap();
        state.move_downloaded_video("item-1", &current).await.unwrap();
        assert_eq!(
            state.downloaded_videos().await.unwrap()[0].file_path,
            current.to_string_lossy()
        );

        assert!(state.remove_downloaded_video("item-1").await.unwrap());
        assert!(!state.remove_downloaded_video("item-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_keeps_resident_paths() {
        let state = setup_state().await;
        let current = PathBuf::from("/media/current_stream.mp4");
        let stale = PathBuf::from("/media/old.mp4");

        state
            .add_downloaded_video("keep", "Keep", &current, None)
            .await
            .unwrap();
        state
            .add_downloaded_video("drop", "Drop", &stale, None)
            .await
            .unwrap();

        let removed = state
            .prune_downloaded_videos(&[current.as_path()])
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let rows = state.downloaded_videos().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].item_id, "keep");
    }
}
