//! Storage accounting and eviction planning
//!
//! Planning is pure: it takes a directory snapshot and returns the files to
//! delete, so the eviction order can be tested without touching disk.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Storage limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageBudget {
    /// Resident bytes allowed after cleanup
    pub max_total_bytes: u64,
    /// Largest single item accepted
    pub max_item_bytes: u64,
}

/// One file in the media directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidentFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

/// Serializable view of a resident file
#[derive(Debug, Clone, Serialize)]
pub struct ResidentFileInfo {
    pub name: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

impl From<&ResidentFile> for ResidentFileInfo {
    fn from(file: &ResidentFile) -> Self {
        Self {
            name: file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            size_bytes: file.size_bytes,
            modified: DateTime::<Utc>::from(file.modified),
        }
    }
}

/// Storage snapshot
#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    pub total_bytes: u64,
    pub file_count: usize,
    pub max_total_bytes: u64,
    pub max_item_bytes: u64,
    pub files: Vec<ResidentFileInfo>,
}

impl StorageInfo {
    pub fn from_files(files: &[ResidentFile], budget: StorageBudget) -> Self {
        Self {
            total_bytes: total_bytes(files),
            file_count: files.len(),
            max_total_bytes: budget.max_total_bytes,
            max_item_bytes: budget.max_item_bytes,
            files: files.iter().map(ResidentFileInfo::from).collect(),
        }
    }
}

/// Regular files directly inside `dir`; a missing directory is empty
pub fn scan(dir: &Path) -> io::Result<Vec<ResidentFile>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let metadata = match entry.metadata() {
            Ok(m) => m,
            // Removed between read_dir and stat
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if !metadata.is_file() {
            continue;
        }
        files.push(ResidentFile {
            path: entry.path(),
            size_bytes: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

pub fn total_bytes(files: &[ResidentFile]) -> u64 {
    files.iter().map(|f| f.size_bytes).sum()
}

/// Inputs to [`plan_cleanup`]
#[derive(Debug, Clone, Copy)]
pub struct CleanupRules<'a> {
    /// Slot files kept unless the budget forces eviction
    pub referenced: &'a [&'a Path],
    /// Files never touched (the file the player reads, an in-flight transfer)
    pub protected: &'a [&'a Path],
    /// Resident bytes allowed once the plan is applied
    pub target_bytes: u64,
}

/// Files to delete, in deletion order
///
/// Every file that is neither referenced nor protected goes first. Then the
/// oldest-by-mtime unprotected files are removed until the remaining total
/// fits `target_bytes`. If only protected files remain the plan stops there.
pub fn plan_cleanup(files: &[ResidentFile], rules: CleanupRules<'_>) -> Vec<PathBuf> {
    let is_in = |set: &[&Path], path: &Path| set.iter().any(|p| *p == path);

    let mut plan = Vec::new();
    let mut kept: Vec<&ResidentFile> = Vec::new();

    for file in files {
        if is_in(rules.protected, &file.path) || is_in(rules.referenced, &file.path) {
            kept.push(file);
        } else {
            plan.push(file.path.clone());
        }
    }

    let mut remaining: u64 = kept.iter().map(|f| f.size_bytes).sum();
    if remaining <= rules.target_bytes {
        return plan;
    }

    let mut evictable: Vec<&ResidentFile> = kept
        .into_iter()
        .filter(|f| !is_in(rules.protected, &f.path))
        .collect();
    evictable.sort_by_key(|f| f.modified);

    for file in evictable {
        if remaining <= rules.target_bytes {
            break;
        }
        remaining -= file.size_bytes;
        plan.push(file.path.clone());
    }

    plan
}
