//! Shared fixtures for loopcast-rd integration tests
//!
//! Collaborators are replaced with in-process fakes: a fixed catalog, a
//! downloader that writes deterministic bytes, a constant duration probe and
//! a filesystem wrapper that can fail the slot rename on demand.

#![allow(dead_code)]

use async_trait::async_trait;
use loopcast_rd::cache::CacheEvent;
use loopcast_rd::catalog::{CatalogFilter, CatalogSource, MediaItem};
use loopcast_rd::config::{RotationConfig, SlotAssignment};
use loopcast_rd::db::RotationState;
use loopcast_rd::download::{DownloadError, Downloader, TransferLimits};
use loopcast_rd::playback::{Collaborators, PlaybackCoordinator};
use loopcast_rd::probe::DurationProbe;
use loopcast_rd::retry::RetryPolicy;
use loopcast_rd::state::SharedState;
use loopcast_rd::swap::{SlotFs, StdFs};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn item(id: &str, size: u64) -> MediaItem {
    MediaItem {
        id: id.to_string(),
        title: format!("Title {}", id),
        remote_uri: format!("mem://{}", id),
        byte_size: Some(size),
        duration_secs: None,
    }
}

/// Bytes the scripted downloader writes for `id`
pub fn content_for(id: &str, size: u64) -> Vec<u8> {
    id.bytes().cycle().take(size as usize).collect()
}

// ----------------------------------------------------------------------------
// Catalog
// ----------------------------------------------------------------------------

/// Returns the first item not excluded, so selection order is predictable
pub struct FakeCatalog {
    items: Vec<MediaItem>,
}

impl FakeCatalog {
    pub fn new(items: Vec<MediaItem>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl CatalogSource for FakeCatalog {
    async fn list(&self, filter: &CatalogFilter) -> loopcast_rd::Result<Vec<MediaItem>> {
        let limit = filter.limit.unwrap_or(50) as usize;
        Ok(self.items.iter().take(limit).cloned().collect())
    }

    async fn random(&self, exclude_ids: &[String]) -> loopcast_rd::Result<Option<MediaItem>> {
        Ok(self
            .items
            .iter()
            .find(|i| !exclude_ids.contains(&i.id))
            .cloned())
    }

    async fn get(&self, id: &str) -> loopcast_rd::Result<Option<MediaItem>> {
        Ok(self.items.iter().find(|i| i.id == id).cloned())
    }
}

// ----------------------------------------------------------------------------
// Downloader
// ----------------------------------------------------------------------------

/// Writes [`content_for`] the item, or fails with HTTP 503 for failing ids
#[derive(Default)]
pub struct ScriptedDownloader {
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedDownloader {
    pub fn fail(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn heal(&self, id: &str) {
        self.failing.lock().unwrap().remove(id);
    }

    /// Item ids in request order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Downloader for ScriptedDownloader {
    async fn fetch(
        &self,
        item: &MediaItem,
        dest: &Path,
        limits: TransferLimits,
    ) -> Result<u64, DownloadError> {
        self.calls.lock().unwrap().push(item.id.clone());

        if self.failing.lock().unwrap().contains(&item.id) {
            return Err(DownloadError::HttpStatus(503));
        }

        let size = item.byte_size.unwrap_or(16);
        if size > limits.max_bytes {
            return Err(DownloadError::TooLarge {
                size,
                limit: limits.max_bytes,
            });
        }

        tokio::fs::write(dest, content_for(&item.id, size)).await?;
        Ok(size)
    }
}

// ----------------------------------------------------------------------------
// Probe
// ----------------------------------------------------------------------------

pub struct FixedProbe(pub f64);

#[async_trait]
impl DurationProbe for FixedProbe {
    async fn probe(&self, _path: &Path) -> loopcast_rd::Result<f64> {
        Ok(self.0)
    }
}

/// Probe that never learns a duration
pub struct FailingProbe;

#[async_trait]
impl DurationProbe for FailingProbe {
    async fn probe(&self, path: &Path) -> loopcast_rd::Result<f64> {
        Err(loopcast_rd::Error::Probe(format!(
            "no duration in {}",
            path.display()
        )))
    }
}

// ----------------------------------------------------------------------------
// Filesystem
// ----------------------------------------------------------------------------

/// [`StdFs`] that can refuse renames into one target path
pub struct FailingFs {
    target: PathBuf,
    armed: AtomicBool,
}

impl FailingFs {
    pub fn new(target: PathBuf) -> Self {
        Self {
            target,
            armed: AtomicBool::new(false),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

impl SlotFs for FailingFs {
    fn exists(&self, path: &Path) -> bool {
        StdFs.exists(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        // Only the next -> current step; the restore comes from temp
        if self.armed.load(Ordering::SeqCst) && to == self.target && !from.ends_with("temp_stream.mp4")
        {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected rename failure"));
        }
        StdFs.rename(from, to)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        StdFs.remove(path)
    }

    fn create_empty(&self, path: &Path) -> io::Result<()> {
        StdFs.create_empty(path)
    }
}

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

/// Small budgets, no retry backoff, 300 s items
pub fn test_config() -> RotationConfig {
    RotationConfig {
        max_storage_bytes: 10_000,
        max_item_bytes: 10_000,
        retry: RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            abandon_for: Duration::from_secs(1800),
        },
        ..Default::default()
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub slots: SlotAssignment,
    pub state: Arc<RotationState>,
    pub shared: Arc<SharedState>,
    pub catalog: Arc<FakeCatalog>,
    pub downloader: Arc<ScriptedDownloader>,
    pub fs: Arc<FailingFs>,
    pub probe_secs: f64,
    pub probe_fails: bool,
}

impl Harness {
    pub async fn new(items: Vec<MediaItem>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        std::fs::create_dir_all(&media).unwrap();
        let slots = SlotAssignment::in_dir(&media);

        let pool = loopcast_common::db::init_memory_database().await.unwrap();

        Self {
            fs: Arc::new(FailingFs::new(slots.current.clone())),
            dir,
            slots,
            state: Arc::new(RotationState::new(pool)),
            shared: Arc::new(SharedState::new()),
            catalog: Arc::new(FakeCatalog::new(items)),
            downloader: Arc::new(ScriptedDownloader::default()),
            probe_secs: 300.0,
            probe_fails: false,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            catalog: Arc::clone(&self.catalog) as Arc<dyn CatalogSource>,
            downloader: Arc::clone(&self.downloader) as Arc<dyn Downloader>,
            probe: if self.probe_fails {
                Arc::new(FailingProbe)
            } else {
                Arc::new(FixedProbe(self.probe_secs))
            },
            slot_fs: Arc::clone(&self.fs) as Arc<dyn SlotFs>,
        }
    }

    pub async fn coordinator(
        &self,
        config: RotationConfig,
    ) -> (PlaybackCoordinator, mpsc::Receiver<CacheEvent>) {
        PlaybackCoordinator::build(
            &self.collaborators(),
            Arc::clone(&self.state),
            Arc::clone(&self.shared),
            self.slots.clone(),
            config,
        )
        .await
    }

    pub fn read_current(&self) -> Vec<u8> {
        std::fs::read(&self.slots.current).unwrap()
    }
}

/// Wait for the next download result
pub async fn next_event(rx: &mut mpsc::Receiver<CacheEvent>) -> CacheEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for download result")
        .expect("download channel closed")
}
