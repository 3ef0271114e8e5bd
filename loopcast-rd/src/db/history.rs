//! Recently played ring
//!
//! Most-recent-first list of played item ids used to avoid near-term repeats.
//! Every insert trims the table so it never holds more than the cap.

use super::{persistence_error, RotationState, WRITE_LOCK_WAIT_MS};
use crate::error::Result;
use crate::retry::retry_on_lock;
use chrono::Utc;
use loopcast_common::db::RecentlyPlayedRow;

/// Hard upper bound on the ring length
pub const MAX_RECENTLY_PLAYED: usize = 100;

impl RotationState {
    /// Append an item to the ring, trimming to the most recent 100 entries
    pub async fn add_recently_played(&self, item_id: &str, title: Option<&str>) -> Result<()> {
        self.add_recently_played_capped(item_id, title, MAX_RECENTLY_PLAYED)
            .await
    }

    /// Append an item, trimming to `cap` entries (clamped to 1..=100)
    pub async fn add_recently_played_capped(
        &self,
        item_id: &str,
        title: Option<&str>,
        cap: usize,
    ) -> Result<()> {
        let cap = cap.clamp(1, MAX_RECENTLY_PLAYED) as i64;
        let _guard = self.writer().await;
        let map_err = persistence_error("add_recently_played");

        retry_on_lock("add_recently_played", WRITE_LOCK_WAIT_MS, || async move {
            let mut tx = self.pool().begin().await?;

            sqlx::query(
                "INSERT INTO recently_played (item_id, title, played_at) VALUES (?, ?, ?)",
            )
            .bind(item_id)
            .bind(title)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

            // Keep only the newest `cap` rows
            sqlx::query(
                r#"
                DELETE FROM recently_played
                WHERE id NOT IN (
                    SELECT id FROM recently_played ORDER BY id DESC LIMIT ?
                )
                "#,
            )
            .bind(cap)
            .execute(&mut *tx)
            .await?;

            tx.commit().await
        })
        .await
        .map_err(map_err)?;

        tracing::debug!(item_id, "Recorded recently played item");
        Ok(())
    }

    /// Most-recent-first ids, at most `limit`
    pub async fn recent_ids(&self, limit: usize) -> Result<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT item_id FROM recently_played ORDER BY id DESC LIMIT ?")
                .bind(limit as i64)
                .fetch_all(self.pool())
                .await?;
        Ok(ids)
    }

    /// Most-recent-first rows, at most `limit`
    pub async fn recently_played(&self, limit: usize) -> Result<Vec<RecentlyPlayedRow>> {
        let rows = sqlx::query_as::<_, RecentlyPlayedRow>(
            "SELECT id, item_id, title, played_at FROM recently_played ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn recently_played_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recently_played")
            .fetch_one(self.pool())
            .await?;
        Ok(count as usize)
    }
}
