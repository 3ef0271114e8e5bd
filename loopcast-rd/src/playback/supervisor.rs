//! Coordinator supervision
//!
//! The coordinator runs as its own task. If it returns an error or panics,
//! a fresh one is built from the persisted rotation state and attached to
//! the same [`CoordinatorHandle`]; streaming resumes when it was active.

use super::coordinator::{Collaborators, PlaybackCoordinator};
use super::handle::CoordinatorHandle;
use crate::config::{RotationConfig, SlotAssignment};
use crate::db::RotationState;
use crate::error::{Error, Result};
use crate::state::SharedState;
use crate::swap::SwapExecutor;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// How often a failing task is restarted
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RestartPolicy {
    fn backoff_for(&self, restart: u32) -> Duration {
        let factor = 1u32 << restart.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Run `launch(attempt)` in a task, restarting on error or panic
///
/// Returns the number of restarts once a run finishes cleanly, or an error
/// after `max_restarts` restarts have all failed.
pub async fn supervise<F, Fut>(name: &str, policy: RestartPolicy, mut launch: F) -> Result<u32>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut restarts = 0u32;

    loop {
        let reason = match tokio::spawn(launch(restarts)).await {
            Ok(Ok(())) => {
                info!(task = name, restarts, "Task exited cleanly");
                return Ok(restarts);
            }
            Ok(Err(e)) => e.to_string(),
            Err(join_error) if join_error.is_panic() => "task panicked".to_string(),
            Err(join_error) => join_error.to_string(),
        };

        if restarts >= policy.max_restarts {
            error!(task = name, restarts, reason = %reason, "Giving up on task");
            return Err(Error::Internal(format!(
                "{} failed after {} restarts: {}",
                name, restarts, reason
            )));
        }

        restarts += 1;
        let backoff = policy.backoff_for(restarts);
        warn!(
            task = name,
            restart = restarts,
            backoff_ms = backoff.as_millis() as u64,
            reason = %reason,
            "Task failed, restarting"
        );
        tokio::time::sleep(backoff).await;
    }
}

/// Everything needed to build a coordinator from persisted state
pub struct CoordinatorFactory {
    pub collaborators: Collaborators,
    pub state: Arc<RotationState>,
    pub shared: Arc<SharedState>,
    pub slots: SlotAssignment,
    /// Start streaming as soon as the first coordinator is up
    pub autostart: bool,
}

impl CoordinatorFactory {
    /// Build a coordinator, attach `handle` to it and run until it exits
    pub async fn run_once(self: Arc<Self>, handle: CoordinatorHandle, attempt: u32) -> Result<()> {
        let resume = if attempt == 0 {
            self.autostart
        } else {
            self.shared.streaming_state().await.is_active()
        };

        if attempt > 0 {
            let restarts = self.shared.record_restart();
            warn!(restarts, resume, "Rebuilding coordinator");

            // A crash may have interrupted a swap
            let executor = SwapExecutor::with_fs(
                self.slots.clone(),
                Arc::clone(&self.collaborators.slot_fs),
            );
            if let Err(e) = executor.recover() {
                warn!(error = %e, "Slot recovery failed");
            }
        }

        let config = RotationConfig::load(&self.state).await?;
        let (mut coordinator, events) = PlaybackCoordinator::build(
            &self.collaborators,
            Arc::clone(&self.state),
            Arc::clone(&self.shared),
            self.slots.clone(),
            config,
        )
        .await;
        let commands = handle.reattach();

        if resume {
            if let Err(e) = coordinator.start_streaming(Instant::now()).await {
                warn!(error = %e, attempt, "Could not start streaming");
            }
        }
        self.shared
            .set_streaming_state(coordinator.streaming_state())
            .await;

        coordinator.run(commands, events).await
    }
}
