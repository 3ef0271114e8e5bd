//! Playlist queue
//!
//! Operator-requested items, played in insertion order before random
//! selection takes over.

use super::{persistence_error, RotationState, WRITE_LOCK_WAIT_MS};
use crate::catalog::MediaItem;
use crate::error::Result;
use crate::retry::retry_on_lock;
use chrono::Utc;
use loopcast_common::db::PlaylistQueueRow;

impl RotationState {
    /// Append an item to the queue, returning its queue id
    pub async fn enqueue(&self, item: &MediaItem) -> Result<i64> {
        let size = item.byte_size.map(|s| s.min(i64::MAX as u64) as i64);
        let _guard = self.writer().await;

        let result = retry_on_lock("enqueue", WRITE_LOCK_WAIT_MS, || {
            sqlx::query(
                r#"
                INSERT INTO playlist_queue (item_id, title, remote_uri, byte_size, added_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&item.id)
            .bind(&item.title)
            .bind(&item.remote_uri)
            .bind(size)
            .bind(Utc::now())
            .execute(self.pool())
        })
        .await
        .map_err(persistence_error("enqueue"))?;

        tracing::info!(item_id = %item.id, "Item queued");
        Ok(result.last_insert_rowid())
    }

    /// Remove and return the oldest queued item
    pub async fn dequeue_next(&self) -> Result<Option<MediaItem>> {
        let _guard = self.writer().await;

        let row = retry_on_lock("dequeue_next", WRITE_LOCK_WAIT_MS, || async move {
            let mut tx = self.pool().begin().await?;

            let row = sqlx::query_as::<_, PlaylistQueueRow>(
                r#"
                SELECT id, item_id, title, remote_uri, byte_size, added_at
                FROM playlist_queue
                ORDER BY id ASC
                LIMIT 1
                "#,
            )
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = &row {
                sqlx::query("DELETE FROM playlist_queue WHERE id = ?")
                    .bind(row.id)
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            Ok::<_, sqlx::Error>(row)
        })
        .await
        .map_err(persistence_error("dequeue_next"))?;

        Ok(row.map(MediaItem::from))
    }

    /// Queue contents in play order
    pub async fn list_queue(&self) -> Result<Vec<PlaylistQueueRow>> {
        let rows = sqlx::query_as::<_, PlaylistQueueRow>(
            r#"
            SELECT id, item_id, title, remote_uri, byte_size, added_at
            FROM playlist_queue
            ORDER BY id ASC
            "#,
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Empty the queue, returning the number of removed entries
    pub async fn clear_queue(&self) -> Result<u64> {
        let _guard = self.writer().await;

        let result = retry_on_lock("clear_queue", WRITE_LOCK_WAIT_MS, || {
            sqlx::query("DELETE FROM playlist_queue").execute(self.pool())
        })
        .await
        .map_err(persistence_error("clear_queue"))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_state() -> RotationState {
        let pool = loopcast_common::db::init_memory_database().await.unwrap();
        RotationState::new(pool)
    }

    fn item(id: &str) -> MediaItem {
        MediaItem {
            id: id.to_string(),
            title: format!("Title {}", id),
            remote_uri: format!("https://example.test/{}.mp4", id),
            byte_size: Some(1024),
            duration_secs: None,
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let state = setup_state().await;
        state.enqueue(&item("a")).await.unwrap();
        state.enqueue(&item("b")).await.unwrap();

        assert_eq!(state.list_queue().await.unwrap().len(), 2);

        let first = state.dequeue_next().await.unwrap().unwrap();
        assert_eq!(first.id, "a");
        assert_eq!(first.byte_size, Some(1024));

        let second = state.dequeue_next().await.unwrap().unwrap();
        assert_eq!(second.id, "b");

        assert!(state.dequeue_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_queue() {
        let state = setup_state().await;
        state.enqueue(&item("a")).await.unwrap();
        state.enqueue(&item("a")).await.unwrap();

        assert_eq!(state.clear_queue().await.unwrap(), 2);
        assert!(state.list_queue().await.unwrap().is_empty());
    }
}
