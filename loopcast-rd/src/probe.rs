//! Duration discovery
//!
//! The probe itself is an external collaborator (`ffprobe` in production).
//! [`DurationProber`] wraps it with a timeout, a per-item cache and the
//! configured fallback estimate.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Reads the playable duration of a local file
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<f64>;
}

/// `ffprobe`-backed probe
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    binary: PathBuf,
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffprobe"),
        }
    }
}

impl FfprobeProbe {
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

/// Parse ffprobe's `format=duration` output
pub fn parse_ffprobe_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .map(str::trim)
        .find_map(|line| line.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

#[async_trait]
impl DurationProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<f64> {
        let output = tokio::process::Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Probe(format!("cannot run {}: {}", self.binary.display(), e)))?;

        if !output.status.success() {
            return Err(Error::Probe(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_ffprobe_duration(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| Error::Probe(format!("no duration reported for {}", path.display())))
    }
}

/// A duration and whether it came from the probe
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DurationEstimate {
    pub secs: f64,
    /// False when `secs` is the configured default
    pub probed: bool,
}

/// Cached, time-bounded probing with a fallback estimate
pub struct DurationProber {
    probe: Arc<dyn DurationProbe>,
    timeout: Duration,
    default_secs: f64,
    cache: Mutex<HashMap<String, f64>>,
}

impl DurationProber {
    pub fn new(probe: Arc<dyn DurationProbe>, timeout: Duration, default_secs: f64) -> Self {
        Self {
            probe,
            timeout,
            default_secs,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Previously probed duration for an item
    pub fn cached(&self, item_id: &str) -> Option<f64> {
        self.cache.lock().ok()?.get(item_id).copied()
    }

    /// Duration of `path` for `item_id`
    ///
    /// Successful probes are cached; failures and timeouts fall back to the
    /// default estimate and are retried on the next call.
    pub async fn duration_for(&self, item_id: &str, path: &Path) -> DurationEstimate {
        if let Some(secs) = self.cached(item_id) {
            return DurationEstimate { secs, probed: true };
        }

        let result = match tokio::time::timeout(self.timeout, self.probe.probe(path)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Probe(format!("timed out after {:?}", self.timeout))),
        };

        match result {
            Ok(secs) => {
                debug!(item_id, secs, "Probed duration");
                if let Ok(mut cache) = self.cache.lock() {
                    cache.insert(item_id.to_string(), secs);
                }
                DurationEstimate { secs, probed: true }
            }
            Err(e) => {
                warn!(
                    item_id,
                    error = %e,
                    default_secs = self.default_secs,
                    "Duration probe failed, using default estimate"
                );
                DurationEstimate {
                    secs: self.default_secs,
                    probed: false,
                }
            }
        }
    }

    /// Drop cached entries for items no longer resident
    pub fn retain(&self, keep: &[&str]) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.retain(|id, _| keep.contains(&id.as_str()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProbe {
        calls: AtomicUsize,
        result: Option<f64>,
    }

    #[async_trait]
    impl DurationProbe for CountingProbe {
        async fn probe(&self, _path: &Path) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .ok_or_else(|| Error::Probe("unreadable container".into()))
        }
    }

    struct HangingProbe;

    #[async_trait]
    impl DurationProbe for HangingProbe {
        async fn probe(&self, _path: &Path) -> Result<f64> {
            std::future::pending::<Result<f64>>().await
        }
    }

    #[test]
    fn test_parse_ffprobe_output() {
        assert_eq!(parse_ffprobe_duration("300.040000\n"), Some(300.04));
        assert_eq!(parse_ffprobe_duration("N/A\n"), None);
        assert_eq!(parse_ffprobe_duration(""), None);
        assert_eq!(parse_ffprobe_duration("0\n"), None);
    }

    #[tokio::test]
    async fn test_success_is_cached() {
        let probe = Arc::new(CountingProbe {
            calls: AtomicUsize::new(0),
            result: Some(300.0),
        });
        let prober = DurationProber::new(probe.clone(), Duration::from_secs(1), 1800.0);

        let first = prober.duration_for("a", Path::new("/x")).await;
        let second = prober.duration_for("a", Path::new("/x")).await;

        assert_eq!(first, DurationEstimate { secs: 300.0, probed: true });
        assert_eq!(second, first);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_falls_back_and_is_not_cached() {
        let probe = Arc::new(CountingProbe {
            calls: AtomicUsize::new(0),
            result: None,
        });
        let prober = DurationProber::new(probe.clone(), Duration::from_secs(1), 1800.0);

        let estimate = prober.duration_for("a", Path::new("/x")).await;
        assert_eq!(estimate, DurationEstimate { secs: 1800.0, probed: false });

        prober.duration_for("a", Path::new("/x")).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        assert!(prober.cached("a").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back() {
        let prober = DurationProber::new(Arc::new(HangingProbe), Duration::from_secs(30), 600.0);
        let estimate = prober.duration_for("a", Path::new("/x")).await;
        assert!(!estimate.probed);
        assert_eq!(estimate.secs, 600.0);
    }

    #[tokio::test]
    async fn test_missing_binary_is_probe_error() {
        let probe = FfprobeProbe::with_binary("/nonexistent/ffprobe");
        let result = probe.probe(Path::new("/tmp/none.mp4")).await;
        assert!(matches!(result, Err(Error::Probe(_))));
    }

    #[tokio::test]
    async fn test_retain_drops_other_items() {
        let probe = Arc::new(CountingProbe {
            calls: AtomicUsize::new(0),
            result: Some(10.0),
        });
        let prober = DurationProber::new(probe, Duration::from_secs(1), 1800.0);
        prober.duration_for("a", Path::new("/a")).await;
        prober.duration_for("b", Path::new("/b")).await;

        prober.retain(&["b"]);
        assert!(prober.cached("a").is_none());
        assert_eq!(prober.cached("b"), Some(10.0));
    }
}
