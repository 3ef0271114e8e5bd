//! Slot swap protocol
//!
//! The external player reads the current slot continuously and reopens it
//! at end of file. A swap replaces that file using renames only:
//!
//! 1. current -> temp (if current exists)
//! 2. next -> current, or an empty placeholder at current when next is absent
//! 3. remove temp
//!
//! If step 2 fails the original is renamed back from temp. Both current and
//! temp missing afterwards is the one condition reported as critical.

use crate::config::SlotAssignment;
use std::io;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Filesystem operations the swap needs
///
/// Production uses [`StdFs`]; tests wrap it to inject failures.
pub trait SlotFs: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove(&self, path: &Path) -> io::Result<()>;
    fn create_empty(&self, path: &Path) -> io::Result<()>;
}

/// Direct `std::fs` implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFs;

impl SlotFs for StdFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn create_empty(&self, path: &Path) -> io::Result<()> {
        std::fs::File::create(path).map(|_| ())
    }
}

/// Swap failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SwapError {
    /// Swap aborted; the current slot still holds the original file
    #[error("swap aborted, original restored: {0}")]
    Restored(String),

    /// Swap aborted and the original could not be put back in place
    #[error("swap aborted, original not restored: {0}")]
    Unrestored(String),

    /// Neither current nor temp exists: the player has nothing to read
    #[error("critical: current and temp slots both missing: {0}")]
    Critical(String),
}

impl SwapError {
    pub fn is_critical(&self) -> bool {
        matches!(self, SwapError::Critical(_))
    }
}

/// Result of a successful swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Next slot moved into the current slot
    Swapped,
    /// No next file: current slot now holds an empty placeholder
    PlaceholderCreated,
}

/// What startup recovery changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Temp file renamed back to the current slot
    pub restored_current: bool,
    /// Stale temp file removed (current slot was intact)
    pub removed_temp: bool,
    /// Interrupted transfer removed
    pub removed_staging: bool,
}

/// Performs the rename protocol on fixed slot paths
#[derive(Clone)]
pub struct SwapExecutor {
    slots: SlotAssignment,
    fs: Arc<dyn SlotFs>,
}

impl SwapExecutor {
    pub fn new(slots: SlotAssignment) -> Self {
        Self::with_fs(slots, Arc::new(StdFs))
    }

    pub fn with_fs(slots: SlotAssignment, fs: Arc<dyn SlotFs>) -> Self {
        Self { slots, fs }
    }

    pub fn slots(&self) -> &SlotAssignment {
        &self.slots
    }

    /// True when the next slot holds a file
    pub fn next_ready(&self) -> bool {
        self.fs.exists(&self.slots.next)
    }

    /// Run the three-step swap
    pub fn execute(&self) -> Result<SwapOutcome, SwapError> {
        let SlotAssignment {
            current, next, temp, ..
        } = &self.slots;

        // Step 1
        let moved_current = if self.fs.exists(current) {
            if let Err(e) = self.fs.rename(current, temp) {
                return Err(self.classify(format!("current -> temp: {}", e)));
            }
            true
        } else {
            false
        };

        // Step 2
        let has_next = self.fs.exists(next);
        let step2 = if has_next {
            self.fs.rename(next, current)
        } else {
            self.fs.create_empty(current)
        };

        if let Err(e) = step2 {
            let reason = if has_next {
                format!("next -> current: {}", e)
            } else {
                format!("placeholder: {}", e)
            };
            return Err(self.restore(moved_current, reason));
        }

        // Step 3
        if self.fs.exists(temp) {
            if let Err(e) = self.fs.remove(temp) {
                warn!(path = %temp.display(), error = %e, "Failed to remove temp slot after swap");
            }
        }

        if has_next {
            info!(current = %current.display(), "Swapped next slot into current");
            Ok(SwapOutcome::Swapped)
        } else {
            warn!(current = %current.display(), "No next file; placeholder written to current slot");
            Ok(SwapOutcome::PlaceholderCreated)
        }
    }

    /// Put the original back after a failed step 2
    fn restore(&self, moved_current: bool, reason: String) -> SwapError {
        let SlotAssignment { current, temp, .. } = &self.slots;

        if !moved_current {
            return self.classify(reason);
        }

        match self.fs.rename(temp, current) {
            Ok(()) => {
                warn!(reason = %reason, "Swap failed; original file restored to current slot");
                SwapError::Restored(reason)
            }
            Err(e) => {
                let reason = format!("{}; restore temp -> current: {}", reason, e);
                self.classify(reason)
            }
        }
    }

    /// Decide how bad a failure is from what is left on disk
    fn classify(&self, reason: String) -> SwapError {
        let SlotAssignment { current, temp, .. } = &self.slots;

        if self.fs.exists(current) {
            warn!(reason = %reason, "Swap failed; current slot intact");
            SwapError::Restored(reason)
        } else if self.fs.exists(temp) {
            error!(reason = %reason, "Swap failed; original left at temp path");
            SwapError::Unrestored(reason)
        } else {
            error!(reason = %reason, "Swap failed; current and temp slots both missing");
            SwapError::Critical(reason)
        }
    }

    /// Rename temp back to current when only temp exists
    pub fn restore_from_temp(&self) -> io::Result<bool> {
        let SlotAssignment { current, temp, .. } = &self.slots;
        if self.fs.exists(current) || !self.fs.exists(temp) {
            return Ok(false);
        }
        self.fs.rename(temp, current)?;
        info!(current = %current.display(), "Restored current slot from temp file");
        Ok(true)
    }

    /// Repair what an interrupted run left behind
    ///
    /// A temp file with no current slot is renamed back; a temp file next to
    /// an intact current slot is removed; an interrupted transfer is removed.
    pub fn recover(&self) -> io::Result<RecoveryReport> {
        let SlotAssignment {
            current,
            temp,
            staging,
            ..
        } = &self.slots;
        let mut report = RecoveryReport::default();

        if self.fs.exists(temp) {
            if self.fs.exists(current) {
                self.fs.remove(temp)?;
                report.removed_temp = true;
            } else {
                report.restored_current = self.restore_from_temp()?;
            }
        }

        if self.fs.exists(staging) {
            self.fs.remove(staging)?;
            report.removed_staging = true;
            info!(path = %staging.display(), "Removed interrupted transfer");
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the rename whose 1-based index equals `fail_rename`
    struct FlakyFs {
        fail_rename: usize,
        renames: AtomicUsize,
    }

    impl SlotFs for FlakyFs {
        fn exists(&self, path: &Path) -> bool {
            StdFs.exists(path)
        }
        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            let n = self.renames.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_rename {
                return Err(io::Error::new(io::ErrorKind::Other, "injected"));
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

    fn setup() -> (tempfile::TempDir, SlotAssignment) {
        let dir = tempfile::tempdir().unwrap();
        let slots = SlotAssignment::in_dir(dir.path());
        (dir, slots)
    }

    #[test]
    fn test_normal_swap() {
        let (_dir, slots) = setup();
        std::fs::write(&slots.current, "A").unwrap();
        std::fs::write(&slots.next, "B").unwrap();

        let outcome = SwapExecutor::new(slots.clone()).execute().unwrap();

        assert_eq!(outcome, SwapOutcome::Swapped);
        assert_eq!(std::fs::read_to_string(&slots.current).unwrap(), "B");
        assert!(!slots.next.exists());
        assert!(!slots.temp.exists());
    }

    #[test]
    fn test_missing_next_writes_placeholder() {
        let (_dir, slots) = setup();
        std::fs::write(&slots.current, "A").unwrap();

        let outcome = SwapExecutor::new(slots.clone()).execute().unwrap();

        assert_eq!(outcome, SwapOutcome::PlaceholderCreated);
        assert_eq!(std::fs::metadata(&slots.current).unwrap().len(), 0);
        assert!(!slots.temp.exists());
    }

    #[test]
    fn test_failure_after_step_one_restores_original() {
        let (_dir, slots) = setup();
        std::fs::write(&slots.current, "A").unwrap();
        std::fs::write(&slots.next, "B").unwrap();

        let fs = Arc::new(FlakyFs {
            fail_rename: 2,
            renames: AtomicUsize::new(0),
        });
        let err = SwapExecutor::with_fs(slots.clone(), fs).execute().unwrap_err();

        assert!(matches!(err, SwapError::Restored(_)));
        assert_eq!(std::fs::read_to_string(&slots.current).unwrap(), "A");
        assert_eq!(std::fs::read_to_string(&slots.next).unwrap(), "B");
        assert!(!slots.temp.exists());
    }

    #[test]
    fn test_failed_restore_leaves_original_at_temp() {
        let (_dir, slots) = setup();
        std::fs::write(&slots.current, "A").unwrap();
        std::fs::write(&slots.next, "B").unwrap();

        struct NoRestoreFs(AtomicUsize);
        impl SlotFs for NoRestoreFs {
            fn exists(&self, path: &Path) -> bool {
                StdFs.exists(path)
            }
            fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
                if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                    StdFs.rename(from, to)
                } else {
                    Err(io::Error::new(io::ErrorKind::Other, "injected"))
                }
            }
            fn remove(&self, path: &Path) -> io::Result<()> {
                StdFs.remove(path)
            }
            fn create_empty(&self, path: &Path) -> io::Result<()> {
                StdFs.create_empty(path)
            }
        }

        let err = SwapExecutor::with_fs(slots.clone(), Arc::new(NoRestoreFs(AtomicUsize::new(0))))
            .execute()
            .unwrap_err();

        assert!(matches!(err, SwapError::Unrestored(_)));
        assert!(!slots.current.exists());
        assert_eq!(std::fs::read_to_string(&slots.temp).unwrap(), "A");
    }

    #[test]
    fn test_nothing_left_is_critical() {
        let (_dir, slots) = setup();
        std::fs::write(&slots.next, "B").unwrap();

        // No current file, and moving next into place fails
        let fs = Arc::new(FlakyFs {
            fail_rename: 1,
            renames: AtomicUsize::new(0),
        });
        let err = SwapExecutor::with_fs(slots.clone(), fs).execute().unwrap_err();

        assert!(err.is_critical());
        assert!(slots.next.exists());
    }

    #[test]
    fn test_recover_restores_current_from_temp() {
        let (_dir, slots) = setup();
        std::fs::write(&slots.temp, "A").unwrap();
        std::fs::write(&slots.staging, "partial").unwrap();

        let report = SwapExecutor::new(slots.clone()).recover().unwrap();

        assert!(report.restored_current);
        assert!(report.removed_staging);
        assert_eq!(std::fs::read_to_string(&slots.current).unwrap(), "A");
        assert!(!slots.temp.exists());
        assert!(!slots.staging.exists());
    }

    #[test]
    fn test_recover_drops_stale_temp() {
        let (_dir, slots) = setup();
        std::fs::write(&slots.current, "B").unwrap();
        std::fs::write(&slots.temp, "A").unwrap();

        let report = SwapExecutor::new(slots.clone()).recover().unwrap();

        assert_eq!(
            report,
            RecoveryReport {
                restored_current: false,
                removed_temp: true,
                removed_staging: false,
            }
        );
        assert_eq!(std::fs::read_to_string(&slots.current).unwrap(), "B");
    }
}
