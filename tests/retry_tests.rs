//! Timeout and retry behaviour of pending requests

mod common;

use common::{failure_frame, reply_registry, settle, start, start_with, success_frame};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tideline::messages::{CodecError, Empty, Envelope, MessageId, Request, RETRIES_EXHAUSTED_CODE};
use tideline::network::{
    ChannelHandler, ConnectionManager, DropReason, Inbound, ManagerEvent, Transport,
    TransportError, TransportEvent,
};
use tideline::ManagerConfig;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_test::assert_ok;

/// Answers every frame from inside `send`, before the write call returns
struct EchoTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Transport for EchoTransport {
    fn connect(&self) {}

    fn disconnect(&self) {}

    fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let frame: Value = serde_json::from_slice(&frame).expect("frames are JSON");
        let id = frame["id"].as_i64().expect("frame has an id");
        let _ = self.events.send(TransportEvent::Text(success_frame(id)));
        Ok(())
    }
}

/// Request that stalls the submitting thread while it is being submitted
#[derive(Debug)]
struct StallingRequest {
    inner: Request<Empty>,
    stall: Duration,
}

impl Envelope for StallingRequest {
    fn id(&self) -> MessageId {
        self.inner.id
    }

    fn route(&self) -> Option<&str> {
        Some(&self.inner.route)
    }

    fn awaits_answer(&self) -> bool {
        std::thread::sleep(self.stall);
        true
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Envelope::encode(&self.inner)
    }
}

/// Request that encodes once and fails on every later attempt
#[derive(Debug)]
struct EncodesOnce {
    inner: Request<Empty>,
    encodes: AtomicUsize,
}

impl Envelope for EncodesOnce {
    fn id(&self) -> MessageId {
        self.inner.id
    }

    fn route(&self) -> Option<&str> {
        Some(&self.inner.route)
    }

    fn awaits_answer(&self) -> bool {
        true
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if self.encodes.fetch_add(1, Ordering::SeqCst) == 0 {
            Envelope::encode(&self.inner)
        } else {
            Err(CodecError::NotAnObject)
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_fails_once_with_sentinel() {
    let mut harness = start(Duration::from_secs(1));
    assert_ok!(harness.manager.send(Request::with_id(1, "ping", Empty {})));
    assert!(harness.manager.is_pending(1));

    sleep(Duration::from_millis(2200)).await;

    let events = harness.drain();
    assert_eq!(events.len(), 1, "expected exactly one failure: {events:?}");
    match &events[0] {
        ManagerEvent::RouteFailure(failure) => {
            assert_eq!(failure.route, "ping");
            assert_eq!(failure.error.error_code, RETRIES_EXHAUSTED_CODE);
            assert_eq!(failure.envelope.id(), 1);
            match &failure.envelope {
                Inbound::Synthetic(response) => {
                    assert_eq!(response.route.as_deref(), Some("ping"));
                    assert!(response.error.is_retries_exhausted());
                }
                Inbound::Decoded(other) => panic!("expected a synthetic failure, got {other:?}"),
            }
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // Original write plus exactly one retry.
    assert_eq!(harness.transport.write_ids(), vec![1, 1]);
    assert!(!harness.manager.is_pending(1));

    sleep(Duration::from_secs(5)).await;
    assert!(harness.drain().is_empty());
    let stats = harness.manager.stats();
    assert_eq!(stats.retries_sent, 1);
    assert_eq!(stats.retries_exhausted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failure_not_delivered_before_twice_the_timeout() {
    let mut harness = start(Duration::from_secs(1));
    assert_ok!(harness.manager.send(Request::with_id(8, "ping", Empty {})));

    sleep(Duration::from_millis(1900)).await;
    assert!(harness.drain().is_empty());
    assert!(harness.manager.is_pending(8));

    sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.drain().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reply_before_first_timeout_means_no_retry() {
    let mut harness = start(Duration::from_secs(1));
    assert_ok!(harness.manager.send(Request::with_id(2, "ping", Empty {})));

    sleep(Duration::from_millis(300)).await;
    harness.transport.reply(&success_frame(2));
    settle().await;
    assert!(!harness.manager.is_pending(2));

    sleep(Duration::from_secs(3)).await;
    let events = harness.drain();
    assert_eq!(events.len(), 1, "unexpected events: {events:?}");
    match &events[0] {
        ManagerEvent::Message(reply) => {
            assert_eq!(reply.id, 2);
            assert!(reply.error.is_success());
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(harness.transport.write_ids(), vec![2]);
    assert_eq!(harness.manager.stats().retries_sent, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reply_after_retry_stops_further_retries() {
    let mut harness = start(Duration::from_secs(1));
    assert_ok!(harness.manager.send(Request::with_id(3, "ping", Empty {})));

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(harness.transport.write_ids(), vec![3, 3]);
    assert!(harness.manager.is_pending(3));

    harness.transport.reply(&success_frame(3));
    sleep(Duration::from_secs(3)).await;

    let events = harness.drain();
    assert_eq!(events.len(), 1, "unexpected events: {events:?}");
    assert!(matches!(&events[0], ManagerEvent::Message(reply) if reply.id == 3));
    assert_eq!(harness.transport.write_ids(), vec![3, 3]);
    assert_eq!(harness.manager.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_remote_failure_uses_pending_route() {
    let mut harness = start(Duration::from_secs(1));
    assert_ok!(harness.manager.send(Request::with_id(6, "join", Empty {})));

    sleep(Duration::from_millis(100)).await;
    harness.transport.reply(&failure_frame(6, 7, "room full"));
    sleep(Duration::from_secs(3)).await;

    let events = harness.drain();
    assert_eq!(events.len(), 1, "unexpected events: {events:?}");
    match &events[0] {
        ManagerEvent::RouteFailure(failure) => {
            assert_eq!(failure.route, "join");
            assert_eq!(failure.error.error_code, 7);
            assert_eq!(failure.error.error_message, "room full");
            assert!(!failure.envelope.is_synthetic());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_fire_and_forget_is_not_tracked() {
    let mut harness = start(Duration::from_secs(1));
    assert_ok!(harness
        .manager
        .send(Request::with_id(4, "log", Empty {}).without_answer()));
    assert_eq!(harness.manager.pending_count(), 0);

    sleep(Duration::from_secs(3)).await;
    assert!(harness.drain().is_empty());
    assert_eq!(harness.transport.write_ids(), vec![4]);
}

#[tokio::test(start_paused = true)]
async fn test_retry_count_is_configurable() {
    let config = ManagerConfig {
        max_retries: 3,
        ..ManagerConfig::with_timeout(Duration::from_secs(1))
    };
    let mut harness = start_with(reply_registry(), config);
    assert_ok!(harness.manager.send(Request::with_id(5, "ping", Empty {})));

    sleep(Duration::from_millis(3500)).await;
    assert!(harness.drain().is_empty());
    assert_eq!(harness.transport.write_ids(), vec![5, 5, 5, 5]);

    sleep(Duration::from_millis(700)).await;
    let events = harness.drain();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        ManagerEvent::RouteFailure(failure) if failure.error.is_retries_exhausted()
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_reply_leaves_request_pending() {
    let mut harness = start(Duration::from_secs(1));
    assert_ok!(harness.manager.send(Request::with_id(11, "ping", Empty {})));

    harness.transport.reply(&success_frame(99));
    settle().await;

    assert!(harness.manager.is_pending(11));
    assert!(matches!(
        harness.drain().as_slice(),
        [ManagerEvent::Message(reply)] if reply.id == 99
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_instant_reply_during_slow_submit_is_not_retried() {
    let (events_tx, transport_events) = mpsc::unbounded_channel();
    let transport = Arc::new(EchoTransport { events: events_tx });
    let (handler, mut events) = ChannelHandler::new();
    let manager = ConnectionManager::builder(transport, transport_events, reply_registry())
        .config(ManagerConfig::with_timeout(Duration::from_millis(200)))
        .handler(handler)
        .start()
        .expect("valid config");

    assert_ok!(manager.submit(Arc::new(StallingRequest {
        inner: Request::with_id(7, "ping", Empty {}),
        stall: Duration::from_millis(50),
    })));
    sleep(Duration::from_millis(600)).await;

    let delivered: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(
        matches!(delivered.as_slice(), [ManagerEvent::Message(reply)] if reply.id == 7),
        "expected a single reply: {delivered:?}"
    );
    assert_eq!(manager.stats().retries_sent, 0);
    assert!(!manager.is_pending(7));
    manager.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_retry_that_stops_encoding_is_reported_then_fails() {
    let mut harness = start(Duration::from_secs(1));
    assert_ok!(harness.manager.submit(Arc::new(EncodesOnce {
        inner: Request::with_id(21, "ping", Empty {}),
        encodes: AtomicUsize::new(0),
    })));

    sleep(Duration::from_millis(1500)).await;
    match harness.drain().as_slice() {
        [ManagerEvent::FrameDropped(DropReason::Encode { id, error })] => {
            assert_eq!(*id, 21);
            assert!(matches!(error, CodecError::NotAnObject));
        }
        other => panic!("unexpected events: {other:?}"),
    }
    assert_eq!(harness.transport.write_ids(), vec![21]);
    assert!(harness.manager.is_pending(21));

    sleep(Duration::from_millis(700)).await;
    match harness.drain().as_slice() {
        [ManagerEvent::RouteFailure(failure)] => {
            assert_eq!(failure.route, "ping");
            assert!(failure.error.is_retries_exhausted());
            assert_eq!(failure.envelope.id(), 21);
        }
        other => panic!("unexpected events: {other:?}"),
    }
    let stats = harness.manager.stats();
    assert_eq!(stats.frames_dropped, 1);
    assert_eq!(stats.retries_exhausted, 1);
}
