//! Playback coordinator
//!
//! Owns every piece of mutable rotation state and drives the state machine
//! `Idle -> Preparing -> Playing -> Stopped`. Operator commands, download
//! results and the periodic tick all arrive through [`PlaybackCoordinator::run`],
//! so decisions are strictly serialized.
//!
//! The public methods take an explicit `now` so the same decisions can be
//! replayed at chosen instants.

use super::handle::Command;
use super::session::PlaybackSession;
use crate::cache::{CacheEvent, CacheManager, CleanupReport, DownloadRequest, DownloadTask, StorageInfo};
use crate::catalog::{CatalogSource, MediaItem};
use crate::config::{RotationConfig, SlotAssignment};
use crate::db::settings::TOTAL_PLAYED_KEY;
use crate::db::RotationState;
use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::probe::{DurationEstimate, DurationProbe, DurationProber};
use crate::retry::RetryDecision;
use crate::state::SharedState;
use crate::swap::{SlotFs, SwapError, SwapExecutor, SwapOutcome};
use chrono::{DateTime, Utc};
use loopcast_common::events::{RotationEvent, StreamingState};
use loopcast_common::time::format_hms;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Persisted count of starvation fallbacks
pub const STARVATION_COUNT_KEY: &str = "starvation_count";
/// Persisted time of the last successful swap
pub const LAST_SWAP_AT_KEY: &str = "last_swap_at";
/// Name of the starvation policy, reported in events
pub const STARVATION_FALLBACK: &str = "loop_current";

/// External collaborators the coordinator is built from
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogSource>,
    pub downloader: Arc<dyn Downloader>,
    pub probe: Arc<dyn DurationProbe>,
    pub slot_fs: Arc<dyn SlotFs>,
}

/// Most recent failure, shown in status
#[derive(Debug, Clone, Serialize)]
pub struct LastError {
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Snapshot returned by the status command
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub state: StreamingState,
    pub epoch: u64,
    pub current_item: Option<MediaItem>,
    /// Item downloaded into, or being fetched for, the next slot
    pub next_item: Option<MediaItem>,
    pub next_ready: bool,
    pub prefetching: bool,
    pub elapsed_secs: f64,
    pub duration_secs: f64,
    pub percentage: f64,
    pub remaining_secs: f64,
    /// False when the duration is the configured estimate
    pub duration_probed: bool,
    pub storage: Option<StorageInfo>,
    pub last_error: Option<LastError>,
    /// A swap failed since the last successful one
    pub degraded: bool,
    /// Automatic swaps are suspended until an operator swap succeeds
    pub critical: bool,
    pub total_played: i64,
    pub starvation_count: u64,
    pub last_swap_at: Option<DateTime<Utc>>,
    pub download: Option<DownloadTask>,
}

/// Item sitting in the next slot
#[derive(Debug, Clone)]
struct ReadyItem {
    item: MediaItem,
    duration: DurationEstimate,
}

pub struct PlaybackCoordinator {
    cache: CacheManager,
    swap: SwapExecutor,
    state: Arc<RotationState>,
    shared: Arc<SharedState>,
    config: RotationConfig,
    streaming: StreamingState,
    /// Bumped on every start and stop; results from older epochs are ignored
    epoch: u64,
    session: Option<PlaybackSession>,
    ready: Option<ReadyItem>,
    /// Item wanted in the next slot whose transfer has not succeeded yet
    pending: Option<MediaItem>,
    prefetching: bool,
    swaps_suspended: bool,
    degraded: bool,
    last_error: Option<LastError>,
    total_played: i64,
    starvation_count: u64,
    last_swap_at: Option<DateTime<Utc>>,
    ticker: Option<Interval>,
}

impl PlaybackCoordinator {
    /// Wire up a coordinator; the receiver carries download results
    pub async fn build(
        collaborators: &Collaborators,
        state: Arc<RotationState>,
        shared: Arc<SharedState>,
        slots: SlotAssignment,
        config: RotationConfig,
    ) -> (Self, mpsc::Receiver<CacheEvent>) {
        let prober = Arc::new(DurationProber::new(
            Arc::clone(&collaborators.probe),
            config.probe_timeout,
            config.default_duration_secs,
        ));
        let (cache, events) = CacheManager::new(
            Arc::clone(&collaborators.catalog),
            Arc::clone(&collaborators.downloader),
            prober,
            Arc::clone(&state),
            slots.clone(),
            &config,
        );
        let swap = SwapExecutor::with_fs(slots, Arc::clone(&collaborators.slot_fs));

        let total_played = read_counter(&state, TOTAL_PLAYED_KEY).await;
        let starvation_count = read_counter(&state, STARVATION_COUNT_KEY).await.max(0) as u64;
        let last_swap_at = match state.get(LAST_SWAP_AT_KEY).await {
            Ok(value) => value.and_then(|v| v.as_datetime()),
            Err(e) => {
                warn!(error = %e, "Cannot read last swap time");
                None
            }
        };

        let coordinator = Self {
            cache,
            swap,
            state,
            shared,
            config,
            streaming: StreamingState::Idle,
            epoch: 0,
            session: None,
            ready: None,
            pending: None,
            prefetching: false,
            swaps_suspended: false,
            degraded: false,
            last_error: None,
            total_played,
            starvation_count,
            last_swap_at,
            ticker: None,
        };
        (coordinator, events)
    }

    pub fn streaming_state(&self) -> StreamingState {
        self.streaming
    }

    // ------------------------------------------------------------------
    // Operator commands
    // ------------------------------------------------------------------

    /// Idle/Stopped -> Preparing: select and fetch the first item
    pub async fn start_streaming(&mut self, now: Instant) -> Result<CoordinatorStatus> {
        if self.streaming.is_active() {
            return Err(Error::InvalidState(format!("already {}", self.streaming)));
        }

        self.epoch += 1;
        self.session = None;
        self.ready = None;
        self.pending = None;
        self.prefetching = false;

        // Whatever sits in the next slot belongs to an earlier run
        if !self.cache.is_downloading() && self.cache.slots().next.exists() {
            let next = self.cache.slots().next.clone();
            info!(path = %next.display(), "Discarding leftover next slot file");
            self.cache.discard(&next).await;
        }

        let item = match self.cache.next_item(&self.active_ids()).await {
            Ok(item) => item,
            Err(e) => {
                self.record_error(&e);
                return Err(e);
            }
        };

        info!(epoch = self.epoch, item_id = %item.id, "Starting stream");
        self.set_state(StreamingState::Preparing).await;
        self.request_download(item, false).await;

        Ok(self.status(now))
    }

    /// Any active state -> Stopped; in-flight results become stale
    pub async fn stop_streaming(&mut self, now: Instant) -> Result<CoordinatorStatus> {
        if !self.streaming.is_active() {
            return Err(Error::InvalidState(format!("not streaming ({})", self.streaming)));
        }

        self.epoch += 1;
        self.session = None;
        self.ready = None;
        self.pending = None;
        self.prefetching = false;

        info!(epoch = self.epoch, "Stream stopped");
        self.set_state(StreamingState::Stopped).await;

        Ok(self.status(now))
    }

    /// Swap immediately regardless of progress
    pub async fn swap_videos(&mut self, now: Instant) -> Result<CoordinatorStatus> {
        if !self.streaming.is_active() {
            return Err(Error::InvalidState(format!(
                "cannot swap while {}",
                self.streaming
            )));
        }

        info!("Manual swap requested");
        self.perform_swap(now).await?;
        Ok(self.status(now))
    }

    pub async fn cleanup(&mut self) -> Result<CleanupReport> {
        let report = self.cache.cleanup().await?;
        if self.ready.is_some() && !self.cache.slots().next.exists() {
            warn!("Next slot evicted to fit the storage budget");
            self.ready = None;
        }
        if report.removed_files > 0 {
            self.emit(RotationEvent::CacheCleaned {
                removed_files: report.removed_files,
                freed_bytes: report.freed_bytes,
                timestamp: Utc::now(),
            });
        }
        Ok(report)
    }

    pub fn storage_info(&self) -> Result<StorageInfo> {
        self.cache.storage_info()
    }

    pub fn status(&self, now: Instant) -> CoordinatorStatus {
        let (elapsed, duration, percentage, remaining, probed) = match &self.session {
            Some(s) => (
                s.elapsed_secs(now),
                s.duration.secs,
                s.percentage(now),
                s.remaining_secs(now),
                s.duration.probed,
            ),
            None => (0.0, 0.0, 0.0, 0.0, false),
        };

        let storage = match self.cache.storage_info() {
            Ok(info) => Some(info),
            Err(e) => {
                debug!(error = %e, "Storage snapshot unavailable");
                None
            }
        };

        CoordinatorStatus {
            state: self.streaming,
            epoch: self.epoch,
            current_item: self.session.as_ref().map(|s| s.item.clone()),
            next_item: self
                .ready
                .as_ref()
                .map(|r| r.item.clone())
                .or_else(|| self.pending.clone()),
            next_ready: self.ready.is_some(),
            prefetching: self.prefetching,
            elapsed_secs: elapsed,
            duration_secs: duration,
            percentage,
            remaining_secs: remaining,
            duration_probed: probed,
            storage,
            last_error: self.last_error.clone(),
            degraded: self.degraded,
            critical: self.swaps_suspended,
            total_played: self.total_played,
            starvation_count: self.starvation_count,
            last_swap_at: self.last_swap_at,
            download: self.cache.current_task().cloned(),
        }
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// One decision pass
    pub async fn tick_at(&mut self, now: Instant) {
        match self.streaming {
            StreamingState::Preparing => {
                if self.ready.is_some() {
                    // First item arrived but could not be moved in yet
                    if !self.swaps_suspended {
                        let _ = self.perform_swap(now).await;
                    }
                } else {
                    self.ensure_next(false).await;
                }
            }
            StreamingState::Playing => self.tick_playing(now).await,
            StreamingState::Idle | StreamingState::Stopped => {}
        }
    }

    async fn tick_playing(&mut self, now: Instant) {
        let Some(session) = &self.session else {
            return;
        };
        let item_id = session.item.id.clone();
        let elapsed = session.elapsed_secs(now);
        let duration = session.duration.secs;
        let percentage = session.percentage(now);
        let remaining = session.remaining_secs(now);

        self.emit(RotationEvent::PlaybackProgress {
            item_id: item_id.clone(),
            elapsed_secs: elapsed,
            duration_secs: duration,
            percentage,
            timestamp: Utc::now(),
        });

        let wants_next = percentage >= self.config.prefetch_threshold_percent || self.pending.is_some();
        if wants_next && self.ready.is_none() && !self.cache.is_downloading() {
            debug!(item_id = %item_id, percentage, "Prefetch threshold reached");
            self.ensure_next(true).await;
        }

        if remaining > self.config.swap_lookahead_secs {
            return;
        }

        if self.swaps_suspended {
            debug!("Automatic swaps suspended; waiting for operator");
            return;
        }

        if self.ready.is_some() {
            if self.perform_swap(now).await.is_err() {
                // Play the current file again rather than retrying every tick
                if let Some(session) = self.session.as_mut() {
                    session.restart(now);
                }
            }
        } else {
            self.starve(now).await;
        }
    }

    /// Loop the current item because its successor is not ready
    async fn starve(&mut self, now: Instant) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.restart(now);
        let item_id = session.item.id.clone();
        let loops = session.loops;

        self.starvation_count += 1;
        match self.state.increment_counter(STARVATION_COUNT_KEY, 1).await {
            Ok(count) => self.starvation_count = count.max(0) as u64,
            Err(e) => {
                warn!(error = %e, "Failed to persist starvation count");
                self.record_error(&e);
            }
        }

        warn!(
            item_id = %item_id,
            loops,
            count = self.starvation_count,
            pending = ?self.pending.as_ref().map(|i| &i.id),
            "Next item not ready; looping current item"
        );
        self.emit(RotationEvent::Starvation {
            item_id,
            fallback: STARVATION_FALLBACK.to_string(),
            count: self.starvation_count,
            timestamp: Utc::now(),
        });
    }

    // ------------------------------------------------------------------
    // Downloads
    // ------------------------------------------------------------------

    /// Ids that must not be chosen as the next item
    fn active_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        if let Some(session) = &self.session {
            ids.push(session.item.id.clone());
        }
        if let Some(ready) = &self.ready {
            ids.push(ready.item.id.clone());
        }
        ids
    }

    /// Start fetching the next item unless one is ready or in flight
    async fn ensure_next(&mut self, prefetch: bool) {
        if self.ready.is_some() || self.cache.is_downloading() {
            return;
        }

        let item = match self.pending.clone() {
            Some(item) => item,
            None => match self.cache.next_item(&self.active_ids()).await {
                Ok(item) => item,
                Err(e) => {
                    warn!(error = %e, "Cannot select next item");
                    self.record_error(&e);
                    return;
                }
            },
        };

        self.request_download(item, prefetch).await;
    }

    async fn request_download(&mut self, item: MediaItem, prefetch: bool) {
        match self.cache.download(item.clone(), self.epoch, prefetch).await {
            DownloadRequest::Started => {
                self.prefetching = prefetch;
                self.emit(RotationEvent::DownloadStarted {
                    item_id: item.id.clone(),
                    title: item.title.clone(),
                    prefetch,
                    timestamp: Utc::now(),
                });
                self.pending = Some(item);
            }
            DownloadRequest::Coalesced => {
                // An earlier run's transfer is still finishing
                self.pending = Some(item);
            }
            DownloadRequest::Backoff(wait) => {
                debug!(item_id = %item.id, wait_secs = wait.as_secs(), "Item in retry backoff");
                self.pending = Some(item);
            }
            DownloadRequest::GaveUp => {
                warn!(item_id = %item.id, "Abandoning item after repeated failures");
                self.pending = None;
            }
            DownloadRequest::Refused(e) => {
                self.record_error(&Error::Download(e.clone()));
                self.emit(RotationEvent::DownloadFailed {
                    item_id: item.id.clone(),
                    reason: e.to_string(),
                    attempt: 0,
                    timestamp: Utc::now(),
                });
                self.pending = None;
            }
        }
    }

    /// Apply a download result
    pub async fn handle_cache_event(&mut self, event: CacheEvent, now: Instant) {
        let attempt = self.cache.finish(&event).await;

        if event.epoch() != self.epoch || !self.streaming.is_active() {
            info!(
                item_id = %event.item().id,
                event_epoch = event.epoch(),
                epoch = self.epoch,
                "Ignoring stale download result"
            );
            if let CacheEvent::DownloadComplete { path, .. } = &event {
                self.cache.discard(path).await;
            }
            return;
        }

        match event {
            CacheEvent::DownloadComplete {
                item,
                size_bytes,
                duration,
                ..
            } => {
                info!(
                    item_id = %item.id,
                    size_bytes,
                    duration_secs = duration.secs,
                    duration_probed = duration.probed,
                    "Download complete"
                );
                self.prefetching = false;
                self.pending = None;
                if !self.cache.slots().next.exists() {
                    // Consumed by a manual swap before this result arrived
                    warn!(item_id = %item.id, "Next slot already taken; dropping result");
                    return;
                }
                self.emit(RotationEvent::DownloadCompleted {
                    item_id: item.id.clone(),
                    size_bytes,
                    duration_secs: duration.secs,
                    duration_probed: duration.probed,
                    timestamp: Utc::now(),
                });
                self.ready = Some(ReadyItem { item, duration });

                if self.streaming == StreamingState::Preparing && !self.swaps_suspended {
                    let _ = self.perform_swap(now).await;
                }
            }
            CacheEvent::DownloadFailed { item, error, .. } => {
                warn!(item_id = %item.id, attempt, error = %error, "Download failed");
                self.prefetching = false;
                self.record_error(&Error::Download(error.clone()));
                self.emit(RotationEvent::DownloadFailed {
                    item_id: item.id.clone(),
                    reason: error.to_string(),
                    attempt,
                    timestamp: Utc::now(),
                });

                if self.cache.retry_decision(&item.id) == RetryDecision::GiveUp {
                    warn!(item_id = %item.id, "Giving up on item; another will be selected");
                    self.pending = None;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Swap
    // ------------------------------------------------------------------

    async fn perform_swap(&mut self, now: Instant) -> Result<SwapOutcome> {
        let outcome = match self.swap.execute() {
            Ok(outcome) => outcome,
            Err(e) => {
                self.on_swap_failed(&e);
                return Err(Error::Swap(e));
            }
        };

        if self.swaps_suspended {
            info!("Swap succeeded; automatic swaps resumed");
        }
        self.swaps_suspended = false;
        self.degraded = false;

        let previous = self.session.take().map(|s| s.item);

        match outcome {
            SwapOutcome::Swapped => {
                let ready = self.ready.take().unwrap_or_else(|| ReadyItem {
                    item: untracked_item(),
                    duration: DurationEstimate {
                        secs: self.config.default_duration_secs,
                        probed: false,
                    },
                });
                let current = ready.item.clone();
                let length = format_hms(ready.duration.secs);

                self.session = Some(PlaybackSession::new(ready.item, now, ready.duration));
                self.pending = None;
                self.prefetching = false;

                self.persist_swap(previous.as_ref(), Some(&current)).await;
                self.cache.prober().retain(&[current.id.as_str()]);

                info!(
                    previous = ?previous.as_ref().map(|i| &i.id),
                    current = %current.id,
                    length = %length,
                    total_played = self.total_played,
                    "Swapped to next item"
                );
                self.emit(RotationEvent::Swapped {
                    previous_item_id: previous.map(|i| i.id),
                    current_item_id: current.id,
                    total_played: self.total_played,
                    timestamp: Utc::now(),
                });

                if self.streaming == StreamingState::Preparing {
                    self.set_state(StreamingState::Playing).await;
                }
            }
            SwapOutcome::PlaceholderCreated => {
                self.ready = None;
                self.persist_swap(previous.as_ref(), None).await;
                if self.streaming == StreamingState::Playing {
                    // Nothing to track; fetch a fresh first item
                    self.set_state(StreamingState::Preparing).await;
                }
            }
        }

        if let Err(e) = self.cleanup().await {
            warn!(error = %e, "Cleanup after swap failed");
            self.record_error(&e);
        }

        Ok(outcome)
    }

    fn on_swap_failed(&mut self, e: &SwapError) {
        self.degraded = true;
        self.record_error(&Error::Swap(e.clone()));
        self.emit(RotationEvent::SwapFailed {
            reason: e.to_string(),
            timestamp: Utc::now(),
        });

        match e {
            SwapError::Restored(_) => {}
            SwapError::Unrestored(_) => {
                if let Err(err) = self.swap.restore_from_temp() {
                    error!(error = %err, "Cannot move original back into current slot");
                }
            }
            SwapError::Critical(reason) => {
                self.swaps_suspended = true;
                error!(reason = %reason, "Player has nothing to read; automatic swaps suspended");
                self.emit(RotationEvent::CriticalFault {
                    reason: reason.clone(),
                    timestamp: Utc::now(),
                });
            }
        }
    }

    /// Record history and counters; failures never undo the swap
    ///
    /// `total_played` counts items that finished and moved to history.
    async fn persist_swap(&mut self, previous: Option<&MediaItem>, current: Option<&MediaItem>) {
        if let Some(prev) = previous {
            if let Err(e) = self
                .state
                .add_recently_played_capped(&prev.id, Some(&prev.title), self.config.history_limit)
                .await
            {
                warn!(item_id = %prev.id, error = %e, "Failed to record recently played");
                self.record_error(&e);
            }
            if let Err(e) = self.state.remove_downloaded_video(&prev.id).await {
                warn!(item_id = %prev.id, error = %e, "Failed to update downloaded file registry");
            }

            match self.state.increment_counter(TOTAL_PLAYED_KEY, 1).await {
                Ok(total) => self.total_played = total,
                Err(e) => {
                    self.total_played += 1;
                    warn!(error = %e, "Failed to persist play counter");
                    self.record_error(&e);
                }
            }
        }

        let Some(current) = current else {
            return;
        };

        let swapped_at = Utc::now();
        self.last_swap_at = Some(swapped_at);
        if let Err(e) = self.state.put(LAST_SWAP_AT_KEY, swapped_at).await {
            warn!(error = %e, "Failed to persist last swap time");
            self.record_error(&e);
        }

        let current_path = self.cache.slots().current.clone();
        if let Err(e) = self.state.move_downloaded_video(&current.id, &current_path).await {
            warn!(item_id = %current.id, error = %e, "Failed to update downloaded file registry");
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn set_state(&mut self, new_state: StreamingState) {
        let old_state = self.streaming;
        if old_state == new_state {
            return;
        }
        self.streaming = new_state;

        if new_state.is_active() {
            if self.ticker.is_none() {
                let mut ticker = tokio::time::interval(self.config.tick_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.ticker = Some(ticker);
            }
        } else {
            self.ticker = None;
        }

        info!(from = %old_state, to = %new_state, "Streaming state changed");
        self.shared.set_streaming_state(new_state).await;
        self.emit(RotationEvent::StateChanged {
            old_state,
            new_state,
            timestamp: Utc::now(),
        });
    }

    fn record_error(&mut self, e: &Error) {
        self.last_error = Some(LastError {
            kind: e.kind().to_string(),
            message: e.to_string(),
            at: Utc::now(),
        });
    }

    fn emit(&self, event: RotationEvent) {
        self.shared.broadcast_event(event);
    }

    // ------------------------------------------------------------------
    // Actor loop
    // ------------------------------------------------------------------

    /// Serve commands, download results and ticks until shutdown
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<CacheEvent>,
    ) -> Result<()> {
        info!(state = %self.streaming, "Coordinator running");

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        info!("Command channel closed; coordinator exiting");
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Some(event) = events.recv() => {
                    self.handle_cache_event(event, Instant::now()).await;
                }
                _ = next_tick(&mut self.ticker) => {
                    self.tick_at(Instant::now()).await;
                }
            }
        }

        Ok(())
    }

    /// Returns false on shutdown
    async fn handle_command(&mut self, command: Command) -> bool {
        let now = Instant::now();
        match command {
            Command::Start { respond_to } => {
                let _ = respond_to.send(self.start_streaming(now).await);
            }
            Command::Stop { respond_to } => {
                let _ = respond_to.send(self.stop_streaming(now).await);
            }
            Command::Swap { respond_to } => {
                let _ = respond_to.send(self.swap_videos(now).await);
            }
            Command::Status { respond_to } => {
                let _ = respond_to.send(self.status(now));
            }
            Command::Cleanup { respond_to } => {
                let _ = respond_to.send(self.cleanup().await);
            }
            Command::Storage { respond_to } => {
                let _ = respond_to.send(self.storage_info());
            }
            Command::Shutdown => {
                info!("Coordinator shutting down");
                return false;
            }
        }
        true
    }
}

async fn next_tick(ticker: &mut Option<Interval>) -> Instant {
    match ticker {
        Some(ticker) => ticker.tick().await,
        None => std::future::pending().await,
    }
}

async fn read_counter(state: &RotationState, key: &str) -> i64 {
    match state.get(key).await {
        Ok(value) => value.and_then(|v| v.as_i64()).unwrap_or(0),
        Err(e) => {
            warn!(key, error = %e, "Cannot read counter; starting from zero");
            0
        }
    }
}

/// Stand-in for a next-slot file the coordinator did not fetch itself
fn untracked_item() -> MediaItem {
    MediaItem {
        id: "untracked".to_string(),
        title: "Untracked file".to_string(),
        remote_uri: String::new(),
        byte_size: None,
        duration_secs: None,
    }
}
