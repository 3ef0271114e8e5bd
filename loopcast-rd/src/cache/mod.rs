//! Two-slot media cache
//!
//! Owns item selection, the single in-flight transfer and eviction. The
//! cache is owned by the coordinator actor and never shared, and none of its
//! methods wait on a transfer. Transfers and probes run on a spawned task
//! whose result comes back as a [`CacheEvent`] on the channel returned by
//! [`CacheManager::new`]. Dropping the cache aborts that task.

pub mod storage;

pub use storage::{StorageBudget, StorageInfo};

use crate::catalog::{CatalogSource, MediaItem};
use crate::config::{RotationConfig, SlotAssignment};
use crate::db::RotationState;
use crate::download::{remove_partial, DownloadError, Downloader, TransferLimits};
use crate::error::{Error, Result};
use crate::probe::{DurationEstimate, DurationProber};
use crate::retry::{FailureTracker, RetryDecision};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use storage::CleanupRules;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Completion events buffered between the transfer task and the actor
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Lifecycle of one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Active,
    Complete,
    Failed,
}

/// One transfer into the next slot
#[derive(Debug, Clone, Serialize)]
pub struct DownloadTask {
    pub item: MediaItem,
    pub destination: PathBuf,
    pub status: TaskStatus,
    /// Coordinator epoch the transfer belongs to
    pub epoch: u64,
    /// True when fetching the successor of a playing item
    pub prefetch: bool,
    pub started_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Transfer result delivered to the coordinator
#[derive(Debug, Clone)]
pub enum CacheEvent {
    DownloadComplete {
        epoch: u64,
        item: MediaItem,
        path: PathBuf,
        size_bytes: u64,
        duration: DurationEstimate,
    },
    DownloadFailed {
        epoch: u64,
        item: MediaItem,
        error: DownloadError,
    },
}

impl CacheEvent {
    pub fn epoch(&self) -> u64 {
        match self {
            CacheEvent::DownloadComplete { epoch, .. } | CacheEvent::DownloadFailed { epoch, .. } => {
                *epoch
            }
        }
    }

    pub fn item(&self) -> &MediaItem {
        match self {
            CacheEvent::DownloadComplete { item, .. } | CacheEvent::DownloadFailed { item, .. } => {
                item
            }
        }
    }
}

/// Answer to a download request
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadRequest {
    /// Transfer spawned
    Started,
    /// A transfer is already in flight; nothing queued
    Coalesced,
    /// Item failed recently; try again after the wait
    Backoff(Duration),
    /// Item exhausted its attempts; pick another
    GaveUp,
    /// Item can never fit; pick another
    Refused(DownloadError),
}

/// Files removed by a cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub removed_files: usize,
    pub freed_bytes: u64,
}

/// Two-slot, storage-budgeted cache
pub struct CacheManager {
    catalog: Arc<dyn CatalogSource>,
    downloader: Arc<dyn Downloader>,
    prober: Arc<DurationProber>,
    state: Arc<RotationState>,
    slots: SlotAssignment,
    budget: StorageBudget,
    download_timeout: Duration,
    history_limit: usize,
    failures: FailureTracker,
    active: Option<DownloadTask>,
    last_task: Option<DownloadTask>,
    /// Cancels the in-flight transfer task
    transfer: Option<AbortHandle>,
    events_tx: mpsc::Sender<CacheEvent>,
}

impl CacheManager {
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        downloader: Arc<dyn Downloader>,
        prober: Arc<DurationProber>,
        state: Arc<RotationState>,
        slots: SlotAssignment,
        config: &RotationConfig,
    ) -> (Self, mpsc::Receiver<CacheEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cache = Self {
            catalog,
            downloader,
            prober,
            state,
            slots,
            budget: StorageBudget {
                max_total_bytes: config.max_storage_bytes,
                max_item_bytes: config.max_item_bytes,
            },
            download_timeout: config.download_timeout,
            history_limit: config.history_limit,
            failures: FailureTracker::new(config.retry),
            active: None,
            last_task: None,
            transfer: None,
            events_tx,
        };
        (cache, events_rx)
    }

    pub fn slots(&self) -> &SlotAssignment {
        &self.slots
    }

    pub fn budget(&self) -> StorageBudget {
        self.budget
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogSource> {
        &self.catalog
    }

    pub fn prober(&self) -> &Arc<DurationProber> {
        &self.prober
    }

    /// True while a transfer is in flight
    pub fn is_downloading(&self) -> bool {
        self.active.is_some()
    }

    /// The in-flight transfer, or the most recent finished one
    pub fn current_task(&self) -> Option<&DownloadTask> {
        self.active.as_ref().or(self.last_task.as_ref())
    }

    pub fn retry_decision(&self, item_id: &str) -> RetryDecision {
        self.failures.decide(item_id)
    }

    /// Random catalog pick avoiding recently played items
    ///
    /// Exclusion is relaxed step by step: history plus `active_ids` plus
    /// abandoned items, then history and abandoned items, then abandoned
    /// items alone, then nothing. Fails with `NoItemsAvailable` only when
    /// the catalog has no playable item at all.
    pub async fn select_next(&self, active_ids: &[String]) -> Result<MediaItem> {
        let history = match self.state.recent_ids(self.history_limit).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Cannot read recently played; selecting without history");
                Vec::new()
            }
        };

        let abandoned = self.failures.given_up();

        let mut relaxed = history.clone();
        relaxed.extend(abandoned.iter().cloned());
        let mut strict = relaxed.clone();
        strict.extend(active_ids.iter().cloned());
        strict.sort();
        strict.dedup();

        if let Some(item) = self.catalog.random(&strict).await? {
            return Ok(item);
        }
        if !history.is_empty() {
            if let Some(item) = self.catalog.random(&relaxed).await? {
                debug!(item_id = %item.id, "Selected with history exclusion only");
                return Ok(item);
            }
        }
        if !abandoned.is_empty() {
            if let Some(item) = self.catalog.random(&abandoned).await? {
                info!(item_id = %item.id, "Every item recently played; history exclusion dropped");
                return Ok(item);
            }
        }
        if let Some(item) = self.catalog.random(&[]).await? {
            info!(item_id = %item.id, "Every candidate excluded; exclusion dropped");
            return Ok(item);
        }

        Err(Error::NoItemsAvailable)
    }

    /// Next item to fetch: the playlist queue first, then [`select_next`](Self::select_next)
    ///
    /// An abandoned item only comes back when nothing else is left (or the
    /// operator queued it); it then gets a fresh set of attempts.
    pub async fn next_item(&mut self, active_ids: &[String]) -> Result<MediaItem> {
        self.failures.prune();

        let item = match self.state.dequeue_next().await {
            Ok(Some(item)) => {
                info!(item_id = %item.id, "Next item taken from playlist queue");
                item
            }
            Ok(None) => self.select_next(active_ids).await?,
            Err(e) => {
                warn!(error = %e, "Cannot read playlist queue; falling back to random");
                self.select_next(active_ids).await?
            }
        };

        if self.failures.decide(&item.id) == RetryDecision::GiveUp && self.failures.forgive(&item.id) {
            info!(item_id = %item.id, "No other candidate; retrying abandoned item");
        }
        Ok(item)
    }

    /// Start fetching `item` into the next slot
    ///
    /// At most one transfer runs; a request while one is active is
    /// coalesced. Before the transfer the cache makes room for the item's
    /// known size (or the per-item cap when unknown).
    pub async fn download(&mut self, item: MediaItem, epoch: u64, prefetch: bool) -> DownloadRequest {
        if let Some(active) = &self.active {
            debug!(
                requested = %item.id,
                active = %active.item.id,
                "Download already in flight; request coalesced"
            );
            return DownloadRequest::Coalesced;
        }

        match self.failures.decide(&item.id) {
            RetryDecision::Ready => {}
            RetryDecision::Wait(wait) => return DownloadRequest::Backoff(wait),
            RetryDecision::GiveUp => return DownloadRequest::GaveUp,
        }

        let estimate = item.byte_size.unwrap_or(self.budget.max_item_bytes);
        if estimate > self.budget.max_item_bytes {
            let error = DownloadError::TooLarge {
                size: estimate,
                limit: self.budget.max_item_bytes,
            };
            warn!(item_id = %item.id, error = %error, "Item exceeds per-item cap");
            self.failures.give_up(&item.id);
            return DownloadRequest::Refused(error);
        }

        if let Err(error) = self.make_room(estimate).await {
            warn!(item_id = %item.id, error = %error, "Not enough storage for item");
            self.failures.give_up(&item.id);
            return DownloadRequest::Refused(error);
        }

        self.spawn_transfer(item, epoch, prefetch);
        DownloadRequest::Started
    }

    fn spawn_transfer(&mut self, item: MediaItem, epoch: u64, prefetch: bool) {
        let task = DownloadTask {
            item: item.clone(),
            destination: self.slots.next.clone(),
            status: TaskStatus::Active,
            epoch,
            prefetch,
            started_at: Utc::now(),
            error: None,
        };
        info!(
            item_id = %item.id,
            title = %item.title,
            prefetch,
            epoch,
            "Download started"
        );
        self.active = Some(task);

        let downloader = Arc::clone(&self.downloader);
        let prober = Arc::clone(&self.prober);
        let tx = self.events_tx.clone();
        let staging = self.slots.staging.clone();
        let next = self.slots.next.clone();
        let limits = TransferLimits {
            max_bytes: self.budget.max_item_bytes,
            timeout: self.download_timeout,
        };

        let handle = tokio::spawn(async move {
            let event = match transfer(downloader.as_ref(), &item, &staging, &next, limits).await {
                Ok(size_bytes) => {
                    let duration = prober.duration_for(&item.id, &next).await;
                    CacheEvent::DownloadComplete {
                        epoch,
                        item,
                        path: next,
                        size_bytes,
                        duration,
                    }
                }
                Err(error) => CacheEvent::DownloadFailed { epoch, item, error },
            };

            if tx.send(event).await.is_err() {
                debug!("Coordinator gone; dropping download result");
            }
        });
        self.transfer = Some(handle.abort_handle());
    }

    /// Bookkeeping for a finished transfer; returns the attempt number of a failure
    ///
    /// Must be called for every event, stale ones included, so the in-flight
    /// slot is released.
    pub async fn finish(&mut self, event: &CacheEvent) -> u32 {
        self.transfer = None;
        let Some(mut task) = self.active.take() else {
            warn!(item_id = %event.item().id, "Download result with no active transfer");
            return 0;
        };

        let attempt = match event {
            CacheEvent::DownloadComplete {
                item,
                path,
                size_bytes,
                ..
            } => {
                task.status = TaskStatus::Complete;
                self.failures.record_success(&item.id);
                if let Err(e) = self
                    .state
                    .add_downloaded_video(&item.id, &item.title, path, Some(*size_bytes))
                    .await
                {
                    warn!(item_id = %item.id, error = %e, "Failed to record downloaded file");
                }
                0
            }
            CacheEvent::DownloadFailed { item, error, .. } => {
                task.status = TaskStatus::Failed;
                task.error = Some(error.to_string());
                let attempt = self.failures.record_failure(&item.id);
                if matches!(error, DownloadError::TooLarge { .. } | DownloadError::Unresolvable(_)) {
                    self.failures.give_up(&item.id);
                }
                attempt
            }
        };

        self.last_task = Some(task);
        attempt
    }

    /// Remove an abandoned download result
    pub async fn discard(&mut self, path: &Path) {
        remove_partial(path).await;
    }

    /// Delete unreferenced files, then evict oldest non-current files until
    /// resident bytes fit the budget
    pub async fn cleanup(&mut self) -> Result<CleanupReport> {
        let report = self.evict_to(self.budget.max_total_bytes)?;

        let resident = [self.slots.current.as_path(), self.slots.next.as_path()];
        let resident: Vec<&Path> = resident.into_iter().filter(|p| p.exists()).collect();
        if let Err(e) = self.state.prune_downloaded_videos(&resident).await {
            warn!(error = %e, "Failed to prune downloaded file registry");
        }

        Ok(report)
    }

    /// Ensure `incoming` more bytes fit the budget
    async fn make_room(&self, incoming: u64) -> std::result::Result<(), DownloadError> {
        let limit = self.budget.max_total_bytes;
        let files = storage::scan(self.slots.media_dir())?;
        if storage::total_bytes(&files) + incoming <= limit {
            return Ok(());
        }

        let target = limit.saturating_sub(incoming);
        self.evict_to(target)
            .map_err(|e| DownloadError::Disk(e.to_string()))?;

        let remaining = storage::total_bytes(&storage::scan(self.slots.media_dir())?);
        if remaining + incoming > limit {
            return Err(DownloadError::TooLarge {
                size: incoming,
                limit: limit.saturating_sub(remaining),
            });
        }
        Ok(())
    }

    fn evict_to(&self, target_bytes: u64) -> Result<CleanupReport> {
        let files = storage::scan(self.slots.media_dir())?;
        let referenced = self.slots.referenced();

        let mut protected: Vec<&Path> = vec![self.slots.current.as_path()];
        if self.active.is_some() {
            protected.push(self.slots.staging.as_path());
        }

        let plan = storage::plan_cleanup(
            &files,
            CleanupRules {
                referenced: &referenced,
                protected: &protected,
                target_bytes,
            },
        );

        let mut report = CleanupReport::default();
        for path in plan {
            let size = files
                .iter()
                .find(|f| f.path == path)
                .map(|f| f.size_bytes)
                .unwrap_or(0);
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    info!(path = %path.display(), size_bytes = size, "Evicted cached file");
                    report.removed_files += 1;
                    report.freed_bytes += size;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to evict cached file");
                }
            }
        }
        Ok(report)
    }

    /// Snapshot of the media directory
    pub fn storage_info(&self) -> Result<StorageInfo> {
        let files = storage::scan(self.slots.media_dir())?;
        Ok(StorageInfo::from_files(&files, self.budget))
    }
}

impl Drop for CacheManager {
    /// Abort the in-flight transfer; a rebuilt cache starts with the slots to itself
    fn drop(&mut self) {
        if let Some(handle) = self.transfer.take() {
            if let Some(task) = &self.active {
                info!(item_id = %task.item.id, epoch = task.epoch, "Cancelling in-flight download");
            }
            handle.abort();
        }
    }
}

/// Fetch into the staging path, then move it into the next slot
async fn transfer(
    downloader: &dyn Downloader,
    item: &MediaItem,
    staging: &Path,
    next: &Path,
    limits: TransferLimits,
) -> std::result::Result<u64, DownloadError> {
    let size = downloader.fetch(item, staging, limits).await?;

    if let Err(e) = tokio::fs::rename(staging, next).await {
        remove_partial(staging).await;
        return Err(DownloadError::Disk(format!(
            "cannot move {} into next slot: {}",
            staging.display(),
            e
        )));
    }
    Ok(size)
}
