//! Event types for the LoopCast event stream
//!
//! Events are broadcast by the rotation daemon and serialized for SSE
//! transmission. Every variant carries the time it was raised.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Streaming state of the rotation coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingState {
    /// Never started
    Idle,
    /// First item selected, waiting for its download
    Preparing,
    /// Current slot is being played and tracked
    Playing,
    /// Stopped by the operator
    Stopped,
}

impl StreamingState {
    /// True while the coordinator owns a tick
    pub fn is_active(&self) -> bool {
        matches!(self, StreamingState::Preparing | StreamingState::Playing)
    }
}

impl std::fmt::Display for StreamingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StreamingState::Idle => "idle",
            StreamingState::Preparing => "preparing",
            StreamingState::Playing => "playing",
            StreamingState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// LoopCast event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RotationEvent {
    /// Coordinator changed state
    StateChanged {
        old_state: StreamingState,
        new_state: StreamingState,
        timestamp: DateTime<Utc>,
    },

    /// A transfer started
    DownloadStarted {
        item_id: String,
        title: String,
        /// True when fetching the item that will follow the current one
        prefetch: bool,
        timestamp: DateTime<Utc>,
    },

    /// A transfer finished and the file sits in the next slot
    DownloadCompleted {
        item_id: String,
        size_bytes: u64,
        duration_secs: f64,
        /// False when the duration is the configured estimate
        duration_probed: bool,
        timestamp: DateTime<Utc>,
    },

    /// A transfer failed; the partial file was removed
    DownloadFailed {
        item_id: String,
        reason: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },

    /// The current slot now holds a new item
    Swapped {
        previous_item_id: Option<String>,
        current_item_id: String,
        total_played: i64,
        timestamp: DateTime<Utc>,
    },

    /// A swap failed and the original file was restored
    SwapFailed {
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Current item neared its end without a ready successor
    Starvation {
        item_id: String,
        /// Fallback that was applied (e.g. "loop_current")
        fallback: String,
        count: u64,
        timestamp: DateTime<Utc>,
    },

    /// Cache cleanup removed files
    CacheCleaned {
        removed_files: usize,
        freed_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    /// Periodic progress of the current item
    PlaybackProgress {
        item_id: String,
        elapsed_secs: f64,
        duration_secs: f64,
        percentage: f64,
        timestamp: DateTime<Utc>,
    },

    /// Nothing is left for the player to read; operator action required
    CriticalFault {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl RotationEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            RotationEvent::StateChanged { .. } => "StateChanged",
            RotationEvent::DownloadStarted { .. } => "DownloadStarted",
            RotationEvent::DownloadCompleted { .. } => "DownloadCompleted",
            RotationEvent::DownloadFailed { .. } => "DownloadFailed",
            RotationEvent::Swapped { .. } => "Swapped",
            RotationEvent::SwapFailed { .. } => "SwapFailed",
            RotationEvent::Starvation { .. } => "Starvation",
            RotationEvent::CacheCleaned { .. } => "CacheCleaned",
            RotationEvent::PlaybackProgress { .. } => "PlaybackProgress",
            RotationEvent::CriticalFault { .. } => "CriticalFault",
        }
    }
}
