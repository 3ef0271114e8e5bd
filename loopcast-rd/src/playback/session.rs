//! Playback progress of the item in the current slot
//!
//! Progress is derived from a monotonic start time; nothing is read back
//! from the player.

use crate::catalog::MediaItem;
use crate::probe::DurationEstimate;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct PlaybackSession {
    pub item: MediaItem,
    pub started_at: Instant,
    pub duration: DurationEstimate,
    /// Times the item was restarted by the starvation fallback
    pub loops: u32,
}

impl PlaybackSession {
    pub fn new(item: MediaItem, started_at: Instant, duration: DurationEstimate) -> Self {
        Self {
            item,
            started_at,
            duration,
            loops: 0,
        }
    }

    pub fn elapsed_secs(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.started_at).as_secs_f64()
    }

    /// Elapsed share of the duration, 0..=100
    pub fn percentage(&self, now: Instant) -> f64 {
        if self.duration.secs <= 0.0 {
            return 100.0;
        }
        (self.elapsed_secs(now) / self.duration.secs * 100.0).clamp(0.0, 100.0)
    }

    /// Seconds left, never negative
    pub fn remaining_secs(&self, now: Instant) -> f64 {
        (self.duration.secs - self.elapsed_secs(now)).max(0.0)
    }

    /// Play the same file again from the start
    pub fn restart(&mut self, now: Instant) {
        self.started_at = now;
        self.loops += 1;
    }
}
