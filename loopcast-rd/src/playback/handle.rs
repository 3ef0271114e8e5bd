//! Command channel into the coordinator
//!
//! Handlers never touch coordinator state directly; they send a [`Command`]
//! carrying a oneshot responder and await the reply. The sender can be
//! replaced when the supervisor restarts the coordinator, so handles held
//! by the HTTP layer stay valid across restarts.

use super::coordinator::CoordinatorStatus;
use crate::cache::{CleanupReport, StorageInfo};
use crate::error::{Error, Result};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, oneshot};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Request to the coordinator
#[derive(Debug)]
pub enum Command {
    Start {
        respond_to: oneshot::Sender<Result<CoordinatorStatus>>,
    },
    Stop {
        respond_to: oneshot::Sender<Result<CoordinatorStatus>>,
    },
    Swap {
        respond_to: oneshot::Sender<Result<CoordinatorStatus>>,
    },
    Status {
        respond_to: oneshot::Sender<CoordinatorStatus>,
    },
    Cleanup {
        respond_to: oneshot::Sender<Result<CleanupReport>>,
    },
    Storage {
        respond_to: oneshot::Sender<Result<StorageInfo>>,
    },
    Shutdown,
}

/// Cloneable sender side
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: Arc<RwLock<mpsc::Sender<Command>>>,
}

impl CoordinatorHandle {
    pub fn channel() -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        (
            Self {
                tx: Arc::new(RwLock::new(tx)),
            },
            rx,
        )
    }

    /// Point every clone of this handle at a fresh coordinator
    pub fn reattach(&self) -> mpsc::Receiver<Command> {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let mut guard = self.tx.write().unwrap_or_else(|e| e.into_inner());
        *guard = tx;
        rx
    }

    fn sender(&self) -> mpsc::Sender<Command> {
        self.tx.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (respond_to, response) = oneshot::channel();
        self.sender()
            .send(make(respond_to))
            .await
            .map_err(|_| Error::Internal("coordinator is not running".to_string()))?;
        response
            .await
            .map_err(|_| Error::Internal("coordinator dropped the request".to_string()))
    }

    pub async fn start(&self) -> Result<CoordinatorStatus> {
        self.request(|respond_to| Command::Start { respond_to }).await?
    }

    pub async fn stop(&self) -> Result<CoordinatorStatus> {
        self.request(|respond_to| Command::Stop { respond_to }).await?
    }

    pub async fn swap(&self) -> Result<CoordinatorStatus> {
        self.request(|respond_to| Command::Swap { respond_to }).await?
    }

    pub async fn status(&self) -> Result<CoordinatorStatus> {
        self.request(|respond_to| Command::Status { respond_to }).await
    }

    pub async fn cleanup(&self) -> Result<CleanupReport> {
        self.request(|respond_to| Command::Cleanup { respond_to }).await?
    }

    pub async fn storage(&self) -> Result<StorageInfo> {
        self.request(|respond_to| Command::Storage { respond_to }).await?
    }

    /// Ask the coordinator to exit its loop
    pub async fn shutdown(&self) -> Result<()> {
        self.sender()
            .send(Command::Shutdown)
            .await
            .map_err(|_| Error::Internal("coordinator is not running".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_fails_without_coordinator() {
        let (handle, rx) = CoordinatorHandle::channel();
        drop(rx);
        let result = handle.cleanup().await;
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_reattach_redirects_clones() {
        let (handle, old_rx) = CoordinatorHandle::channel();
        let clone = handle.clone();
        drop(old_rx);

        let mut rx = handle.reattach();
        tokio::spawn(async move {
            if let Some(Command::Cleanup { respond_to }) = rx.recv().await {
                let _ = respond_to.send(Ok(CleanupReport {
                    removed_files: 2,
                    freed_bytes: 10,
                }));
            }
        });

        let report = clone.cleanup().await.unwrap();
        assert_eq!(report.removed_files, 2);
    }
}
