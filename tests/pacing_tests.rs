//! Outbound write pacing and encoding

mod common;

use common::{settle, start, start_with, reply_registry};
use std::time::Duration;
use tideline::messages::{CodecError, Empty, Request};
use tideline::network::{SendError, MIN_SEND_INTERVAL};
use tideline::ManagerConfig;
use tokio::time::{sleep, Instant};
use tokio_test::assert_ok;

#[tokio::test(start_paused = true)]
async fn test_burst_is_spaced_and_ordered() {
    let harness = start(Duration::from_secs(10));
    let started = Instant::now();
    for id in 1..=5 {
        assert_ok!(harness.manager.send(Request::with_id(id, "move", Empty {})));
    }

    sleep(Duration::from_millis(100)).await;

    let writes = harness.transport.writes();
    assert_eq!(writes.iter().map(|w| w.id()).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    assert!(writes[0].at - started < MIN_SEND_INTERVAL);
    for pair in writes.windows(2) {
        assert!(
            pair[1].at - pair[0].at >= MIN_SEND_INTERVAL,
            "writes {} and {} only {:?} apart",
            pair[0].id(),
            pair[1].id(),
            pair[1].at - pair[0].at
        );
    }
    // The burst drains in roughly one interval per message.
    assert!(writes[4].at - started < Duration::from_millis(60));
}

#[tokio::test(start_paused = true)]
async fn test_spaced_submissions_are_written_immediately() {
    let harness = start(Duration::from_secs(10));

    let first = Instant::now();
    assert_ok!(harness.manager.send(Request::with_id(1, "move", Empty {})));
    sleep(Duration::from_millis(50)).await;
    let second = Instant::now();
    assert_ok!(harness.manager.send(Request::with_id(2, "move", Empty {})));
    settle().await;

    let writes = harness.transport.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].at, first);
    assert_eq!(writes[1].at, second);
}

#[tokio::test(start_paused = true)]
async fn test_configured_interval_is_honored() {
    let config = ManagerConfig {
        min_send_interval: Duration::from_millis(40),
        ..ManagerConfig::with_timeout(Duration::from_secs(10))
    };
    let harness = start_with(reply_registry(), config);
    for id in 1..=3 {
        assert_ok!(harness.manager.send(Request::with_id(id, "move", Empty {})));
    }

    sleep(Duration::from_millis(200)).await;

    let writes = harness.transport.writes();
    assert_eq!(writes.len(), 3);
    for pair in writes.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(40));
    }
}

#[tokio::test(start_paused = true)]
async fn test_frames_carry_envelope_fields() {
    let harness = start(Duration::from_secs(10));
    assert_ok!(harness
        .manager
        .send(Request::with_id(12, "chat", serde_json::json!({ "text": "hi" }))));
    settle().await;

    let writes = harness.transport.writes();
    assert_eq!(writes.len(), 1);
    let frame = &writes[0].frame;
    assert_eq!(frame["id"], 12);
    assert_eq!(frame["method"], "chat");
    assert_eq!(frame["text"], "hi");
}

#[tokio::test(start_paused = true)]
async fn test_unencodable_message_is_rejected() {
    let harness = start(Duration::from_secs(1));

    // A bare number has no fields to merge into the envelope object.
    let result = harness.manager.send(Request::with_id(9, "count", 42u32));
    assert!(matches!(result, Err(SendError::Encode(CodecError::NotAnObject))));
    assert!(!harness.manager.is_pending(9));

    sleep(Duration::from_secs(3)).await;
    assert!(harness.transport.writes().is_empty());
}
