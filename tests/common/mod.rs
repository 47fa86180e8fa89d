//! Common test utilities shared by the integration tests
//!
//! Provides a recording mock transport and helpers to start a manager on
//! tokio's paused clock.

#![allow(dead_code)]

use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tideline::messages::{Empty, Response, TypeRegistry};
use tideline::network::{
    ChannelHandler, ConnectionManager, ManagerEvent, Transport, TransportError, TransportEvent,
};
use tideline::ManagerConfig;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A frame written to the mock transport and when it was written
#[derive(Debug, Clone)]
pub struct Write {
    pub at: Instant,
    pub frame: Value,
}

impl Write {
    pub fn id(&self) -> i64 {
        self.frame["id"].as_i64().expect("written frame has an id")
    }
}

/// Transport that records every command and lets tests inject events
pub struct MockTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    writes: Mutex<Vec<Write>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    pings: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            events,
            writes: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
        });
        (transport, rx)
    }

    pub fn inject(&self, event: TransportEvent) {
        self.events.send(event).expect("manager stopped");
    }

    /// Deliver a text frame as if the peer had sent it
    pub fn reply(&self, json: &str) {
        self.inject(TransportEvent::Text(json.to_string()));
    }

    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().unwrap().clone()
    }

    pub fn write_ids(&self) -> Vec<i64> {
        self.writes().iter().map(Write::id).collect()
    }

    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn ping_calls(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let frame = serde_json::from_slice(&frame).expect("frames are JSON");
        self.writes.lock().unwrap().push(Write {
            at: Instant::now(),
            frame,
        });
        Ok(())
    }

    fn ping(&self) -> Result<(), TransportError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub type Reply = Response<Empty>;

/// Registry accepting any read-side reply without a payload
pub fn reply_registry() -> TypeRegistry<Reply> {
    TypeRegistry::new().register_response("reply", |reply: Reply| reply)
}

pub struct Harness<M> {
    pub manager: ConnectionManager<M>,
    pub transport: Arc<MockTransport>,
    pub events: mpsc::UnboundedReceiver<ManagerEvent<M>>,
}

impl<M> Harness<M> {
    /// Everything delivered to the application so far
    pub fn drain(&mut self) -> Vec<ManagerEvent<M>> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn start_with<M: tideline::InboundMessage>(
    registry: TypeRegistry<M>,
    config: ManagerConfig,
) -> Harness<M> {
    let (transport, transport_events) = MockTransport::new();
    let (handler, events) = ChannelHandler::new();
    let manager = ConnectionManager::builder(transport.clone(), transport_events, registry)
        .config(config)
        .handler(handler)
        .start()
        .expect("valid config");
    Harness {
        manager,
        transport,
        events,
    }
}

/// Manager over the mock transport with the given reply timeout
pub fn start(timeout: Duration) -> Harness<Reply> {
    start_with(reply_registry(), ManagerConfig::with_timeout(timeout))
}

/// Let spawned tasks run; advances the paused clock by one millisecond
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn success_frame(id: i64) -> String {
    format!(r#"{{"id": {}, "error": {{"errorCode": 0, "errorMessage": ""}}}}"#, id)
}

pub fn failure_frame(id: i64, code: i32, message: &str) -> String {
    format!(
        r#"{{"id": {}, "error": {{"errorCode": {}, "errorMessage": "{}"}}}}"#,
        id, code, message
    )
}
