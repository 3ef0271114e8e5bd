//! Swap failures seen through the coordinator

mod helpers;

use helpers::*;
use loopcast_common::events::{RotationEvent, StreamingState};
use loopcast_rd::swap::SwapError;
use loopcast_rd::Error;
use std::time::Duration;
use tokio::time::Instant;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// Coordinator playing A with B ready in the next slot
async fn playing_with_next_ready(
    h: &Harness,
    t0: Instant,
) -> (
    loopcast_rd::playback::PlaybackCoordinator,
    tokio::sync::mpsc::Receiver<loopcast_rd::cache::CacheEvent>,
) {
    let (mut coordinator, mut events) = h.coordinator(test_config()).await;
    coordinator.start_streaming(t0).await.unwrap();
    let event = next_event(&mut events).await;
    coordinator.handle_cache_event(event, t0).await;

    coordinator.tick_at(t0 + secs(230)).await;
    let event = next_event(&mut events).await;
    coordinator.handle_cache_event(event, t0 + secs(231)).await;
    assert!(coordinator.status(t0 + secs(231)).next_ready);

    (coordinator, events)
}

#[tokio::test]
async fn test_failed_swap_restores_original() {
    let h = Harness::new(vec![item("A", 32), item("B", 32)]).await;
    let t0 = Instant::now();
    let (mut coordinator, _events) = playing_with_next_ready(&h, t0).await;
    let mut broadcasts = h.shared.subscribe_events();

    h.fs.arm();
    let result = coordinator.swap_videos(t0 + secs(240)).await;
    assert!(matches!(result, Err(Error::Swap(SwapError::Restored(_)))));

    // The player still reads A
    assert_eq!(h.read_current(), content_for("A", 32));
    assert!(!h.slots.temp.exists());
    assert!(h.slots.next.exists());

    let status = coordinator.status(t0 + secs(240));
    assert!(status.degraded);
    assert!(!status.critical);
    assert_eq!(status.state, StreamingState::Playing);
    assert_eq!(status.current_item.unwrap().id, "A");
    assert!(status.next_ready);
    assert_eq!(status.last_error.unwrap().kind, "swap");

    let mut saw_swap_failed = false;
    while let Ok(event) = broadcasts.try_recv() {
        if matches!(event, RotationEvent::SwapFailed { .. }) {
            saw_swap_failed = true;
        }
    }
    assert!(saw_swap_failed);

    // Once the filesystem recovers the automatic swap goes through
    h.fs.disarm();
    coordinator.tick_at(t0 + secs(299)).await;
    let status = coordinator.status(t0 + secs(299));
    assert!(!status.degraded);
    assert_eq!(status.current_item.unwrap().id, "B");
    assert_eq!(h.read_current(), content_for("B", 32));
}

#[tokio::test]
async fn test_failed_automatic_swap_loops_current() {
    let h = Harness::new(vec![item("A", 32), item("B", 32)]).await;
    let t0 = Instant::now();
    let (mut coordinator, _events) = playing_with_next_ready(&h, t0).await;

    h.fs.arm();
    coordinator.tick_at(t0 + secs(299)).await;

    let status = coordinator.status(t0 + secs(299));
    assert!(status.degraded);
    assert_eq!(status.current_item.unwrap().id, "A");
    assert_eq!(status.elapsed_secs, 0.0);
    assert_eq!(h.read_current(), content_for("A", 32));

    // No retry storm: the next attempt waits for the end of the replay
    coordinator.tick_at(t0 + secs(300)).await;
    assert_eq!(coordinator.status(t0 + secs(300)).current_item.unwrap().id, "A");
}

#[tokio::test]
async fn test_critical_failure_suspends_automatic_swaps() {
    let h = Harness::new(vec![item("A", 32), item("B", 32)]).await;
    let t0 = Instant::now();
    let (mut coordinator, _events) = playing_with_next_ready(&h, t0).await;
    let mut broadcasts = h.shared.subscribe_events();

    // Current slot vanished underneath us and the rename fails
    std::fs::remove_file(&h.slots.current).unwrap();
    h.fs.arm();

    let result = coordinator.swap_videos(t0 + secs(240)).await;
    assert!(matches!(result, Err(Error::Swap(SwapError::Critical(_)))));

    let status = coordinator.status(t0 + secs(240));
    assert!(status.critical);
    assert!(status.degraded);
    let mut saw_critical = false;
    while let Ok(event) = broadcasts.try_recv() {
        if matches!(event, RotationEvent::CriticalFault { .. }) {
            saw_critical = true;
        }
    }
    assert!(saw_critical);

    // Automatic swaps stay off even after the filesystem recovers
    h.fs.disarm();
    coordinator.tick_at(t0 + secs(299)).await;
    assert_eq!(coordinator.status(t0 + secs(299)).current_item.unwrap().id, "A");
    assert!(!h.slots.current.exists());

    // An operator swap clears the suspension
    let status = coordinator.swap_videos(t0 + secs(300)).await.unwrap();
    assert!(!status.critical);
    assert!(!status.degraded);
    assert_eq!(status.current_item.unwrap().id, "B");
    assert_eq!(h.read_current(), content_for("B", 32));
}
