//! Shared daemon state
//!
//! Read-mostly state shared between the coordinator actor, its supervisor and
//! the HTTP handlers. Mutable rotation state is owned by the coordinator and
//! is not kept here.

use loopcast_common::events::{RotationEvent, StreamingState};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{broadcast, RwLock};

/// Buffered events per SSE subscriber before it is reported as lagging
const EVENT_BUFFER: usize = 256;

/// Shared state accessible by all components
pub struct SharedState {
    /// Last streaming state published by the coordinator
    pub streaming_state: RwLock<StreamingState>,

    /// Event broadcaster for SSE events
    pub event_tx: broadcast::Sender<RotationEvent>,

    /// Times the supervisor restarted a failed coordinator
    pub coordinator_restarts: AtomicU32,
}

impl SharedState {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            streaming_state: RwLock::new(StreamingState::Idle),
            event_tx,
            coordinator_restarts: AtomicU32::new(0),
        }
    }

    /// Broadcast an event to all SSE listeners
    pub fn broadcast_event(&self, event: RotationEvent) {
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }

    /// Subscribe to event stream for SSE
    pub fn subscribe_events(&self) -> broadcast::Receiver<RotationEvent> {
        self.event_tx.subscribe()
    }

    pub async fn streaming_state(&self) -> StreamingState {
        *self.streaming_state.read().await
    }

    pub async fn set_streaming_state(&self, state: StreamingState) {
        *self.streaming_state.write().await = state;
    }

    pub fn record_restart(&self) -> u32 {
        self.coordinator_restarts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn restarts(&self) -> u32 {
        self.coordinator_restarts.load(Ordering::Relaxed)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_subscriber() {
        let state = SharedState::new();
        let mut rx = state.subscribe_events();

        state.broadcast_event(RotationEvent::SwapFailed {
            reason: "rename".into(),
            timestamp: chrono::Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "SwapFailed");
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_ok() {
        let state = SharedState::new();
        state.broadcast_event(RotationEvent::CriticalFault {
            reason: "none".into(),
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(state.streaming_state().await, StreamingState::Idle);
    }

    #[test]
    fn test_restart_counter() {
        let state = SharedState::new();
        assert_eq!(state.record_restart(), 1);
        assert_eq!(state.record_restart(), 2);
        assert_eq!(state.restarts(), 2);
    }
}
