//! Runtime configuration
//!
//! Rotation tuning lives in the `settings` table (database-first). Each value
//! is read on startup and written back with its default when missing, so an
//! operator can inspect and edit every knob in one place.
//!
//! Slot paths are fixed names inside `<root>/media`.

use crate::db::RotationState;
use crate::error::Result;
use crate::retry::RetryPolicy;
use loopcast_common::human_size::GIB;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// File the external player reads
pub const CURRENT_SLOT_FILE: &str = "current_stream.mp4";
/// File the next item is downloaded into
pub const NEXT_SLOT_FILE: &str = "next_stream.mp4";
/// Scratch name used during a swap
pub const TEMP_SLOT_FILE: &str = "temp_stream.mp4";
/// In-flight transfer target, renamed to the next slot on success
pub const STAGING_FILE: &str = "next_stream.mp4.part";

/// Fixed slot paths, reused for the life of the process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotAssignment {
    pub current: PathBuf,
    pub next: PathBuf,
    pub temp: PathBuf,
    pub staging: PathBuf,
}

impl SlotAssignment {
    /// Standard slot names inside `media_dir`
    pub fn in_dir(media_dir: &Path) -> Self {
        Self {
            current: media_dir.join(CURRENT_SLOT_FILE),
            next: media_dir.join(NEXT_SLOT_FILE),
            temp: media_dir.join(TEMP_SLOT_FILE),
            staging: media_dir.join(STAGING_FILE),
        }
    }

    /// Directory holding the slots
    pub fn media_dir(&self) -> &Path {
        self.current.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Files the cache must never evict
    pub fn referenced(&self) -> [&Path; 2] {
        [self.current.as_path(), self.next.as_path()]
    }
}

/// Rotation tuning
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RotationConfig {
    /// Total bytes the media directory may hold after cleanup
    pub max_storage_bytes: u64,
    /// Largest single item accepted
    pub max_item_bytes: u64,
    /// Playback percentage at which the next item is fetched
    pub prefetch_threshold_percent: f64,
    /// Remaining seconds at which the swap happens
    pub swap_lookahead_secs: f64,
    pub tick_interval: Duration,
    /// Duration assumed when the probe fails
    pub default_duration_secs: f64,
    pub download_timeout: Duration,
    pub probe_timeout: Duration,
    #[serde(skip)]
    pub retry: RetryPolicy,
    /// Recently played entries kept (at most 100)
    pub history_limit: usize,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_storage_bytes: 40 * GIB,
            max_item_bytes: 10 * GIB,
            prefetch_threshold_percent: 75.0,
            swap_lookahead_secs: 2.0,
            tick_interval: Duration::from_millis(1000),
            default_duration_secs: 1800.0,
            download_timeout: Duration::from_secs(3600),
            probe_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            history_limit: crate::db::history::MAX_RECENTLY_PLAYED,
        }
    }
}

impl RotationConfig {
    /// Load from the settings table, writing defaults for missing keys
    pub async fn load(state: &RotationState) -> Result<Self> {
        let d = Self::default();

        let max_storage_bytes = state
            .get_or_init("max_storage_bytes", d.max_storage_bytes)
            .await?;
        let max_item_bytes = state.get_or_init("max_item_bytes", d.max_item_bytes).await?;
        let prefetch_threshold_percent: f64 = state
            .get_or_init("prefetch_threshold_percent", d.prefetch_threshold_percent)
            .await?;
        let swap_lookahead_secs: f64 = state
            .get_or_init("swap_lookahead_secs", d.swap_lookahead_secs)
            .await?;
        let tick_interval_ms: u64 = state
            .get_or_init("tick_interval_ms", d.tick_interval.as_millis() as u64)
            .await?;
        let default_duration_secs: f64 = state
            .get_or_init("default_duration_secs", d.default_duration_secs)
            .await?;
        let download_timeout_secs: u64 = state
            .get_or_init("download_timeout_secs", d.download_timeout.as_secs())
            .await?;
        let probe_timeout_secs: u64 = state
            .get_or_init("probe_timeout_secs", d.probe_timeout.as_secs())
            .await?;
        let retry_backoff_secs: u64 = state
            .get_or_init("retry_backoff_secs", d.retry.base_backoff.as_secs())
            .await?;
        let max_attempts: u64 = state
            .get_or_init("max_attempts_per_item", d.retry.max_attempts as u64)
            .await?;
        let abandon_secs: u64 = state
            .get_or_init("abandon_cooldown_secs", d.retry.abandon_for.as_secs())
            .await?;
        let history_limit: u64 = state
            .get_or_init("history_limit", d.history_limit as u64)
            .await?;

        let config = Self {
            max_storage_bytes,
            max_item_bytes: max_item_bytes.min(max_storage_bytes),
            prefetch_threshold_percent: prefetch_threshold_percent.clamp(1.0, 100.0),
            swap_lookahead_secs: swap_lookahead_secs.max(0.0),
            tick_interval: Duration::from_millis(tick_interval_ms.max(10)),
            default_duration_secs: if default_duration_secs > 0.0 {
                default_duration_secs
            } else {
                d.default_duration_secs
            },
            download_timeout: Duration::from_secs(download_timeout_secs.max(1)),
            probe_timeout: Duration::from_secs(probe_timeout_secs.max(1)),
            retry: RetryPolicy {
                max_attempts: max_attempts.clamp(1, u32::MAX as u64) as u32,
                base_backoff: Duration::from_secs(retry_backoff_secs),
                abandon_for: Duration::from_secs(abandon_secs),
                ..d.retry
            },
            history_limit: (history_limit as usize)
                .clamp(1, crate::db::history::MAX_RECENTLY_PLAYED),
        };

        info!(
            max_storage_bytes = config.max_storage_bytes,
            max_item_bytes = config.max_item_bytes,
            prefetch_threshold_percent = config.prefetch_threshold_percent,
            swap_lookahead_secs = config.swap_lookahead_secs,
            "Rotation configuration loaded"
        );
        Ok(config)
    }
}
