use crate::config::ManagerConfig;
use crate::messages::{Envelope, Request, Response, TypeRegistry};
use crate::network::{
    ChannelHandler, ConnectionManager, ManagerEvent, ManagerStats, Transport, TransportError,
    TransportErrorKind, TransportEvent,
};
use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// In-process transport that answers every request with an echo reply
pub struct LoopbackTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: AtomicBool,
    drop_replies: bool,
    latency: Duration,
}

impl LoopbackTransport {
    pub fn new(
        drop_replies: bool,
        latency: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            events,
            connected: AtomicBool::new(false),
            drop_replies,
            latency,
        });
        (transport, rx)
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("Loopback event receiver dropped");
        }
    }
}

impl Transport for LoopbackTransport {
    fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.emit(TransportEvent::Connected);
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::Disconnected {
            reason: "client closed".to_string(),
            code: 1000,
        });
    }

    fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::closed());
        }
        if self.drop_replies {
            return Ok(());
        }

        let request = Request::<Value>::decode(&frame)
            .map_err(|e| TransportError::new(TransportErrorKind::Protocol, e.to_string()))?;
        let reply = Response::success(request.id, json!({ "echo": request.payload }))
            .with_route(request.route);
        let events = self.events.clone();
        let latency = self.latency;
        tokio::spawn(async move {
            sleep(latency).await;
            match reply.encode() {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    let _ = events.send(TransportEvent::Text(text));
                }
                Err(e) => warn!(error = %e, "Loopback failed to encode reply"),
            }
        });
        Ok(())
    }

    fn ping(&self) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::closed());
        }
        self.emit(TransportEvent::Pong);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub count: u32,
    pub drop_replies: bool,
    pub latency: Duration,
    pub config: ManagerConfig,
}

#[derive(Debug, Clone)]
pub struct DemoReport {
    pub succeeded: u32,
    pub failed: u32,
    pub elapsed: Duration,
    pub stats: ManagerStats,
}

impl fmt::Display for DemoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} succeeded, {} failed in {:.2}s",
            self.succeeded,
            self.failed,
            self.elapsed.as_secs_f64()
        )?;
        write!(f, "{}", self.stats)
    }
}

/// Drive `options.count` echo requests through a loopback connection
pub async fn run_demo(options: DemoOptions) -> Result<DemoReport> {
    let (transport, events) = LoopbackTransport::new(options.drop_replies, options.latency);
    let (handler, mut rx) = ChannelHandler::new();
    let registry = TypeRegistry::new().register_response("echo", |reply: Response<Value>| reply);

    let deadline = options.config.time_to_failure() + Duration::from_secs(5);
    let manager = ConnectionManager::builder(transport, events, registry)
        .config(options.config)
        .handler(handler)
        .start()
        .context("Failed to start connection manager")?;

    manager.connect().context("Failed to request connection")?;
    timeout(Duration::from_secs(5), async {
        while let Some(event) = rx.recv().await {
            if matches!(event, ManagerEvent::Connected) {
                return Ok(());
            }
        }
        bail!("Event stream closed before connecting")
    })
    .await
    .context("Timed out waiting for the loopback connection")??;
    info!("Loopback connected");

    let started = Instant::now();
    for seq in 0..options.count {
        manager
            .send(Request::new("echo", json!({ "seq": seq })))
            .with_context(|| format!("Failed to send request {}", seq))?;
    }

    let mut succeeded = 0;
    let mut failed = 0;
    timeout(deadline, async {
        while succeeded + failed < options.count {
            match rx.recv().await {
                Some(ManagerEvent::Message(reply)) => {
                    succeeded += 1;
                    let echo = reply.payload.unwrap_or(Value::Null);
                    println!("✓ {} -> {}", reply.id, echo);
                }
                Some(ManagerEvent::RouteFailure(failure)) => {
                    failed += 1;
                    println!(
                        "✗ {} [{}] {}",
                        failure.envelope.id(),
                        failure.route,
                        failure.error
                    );
                }
                Some(ManagerEvent::FrameDropped(reason)) => warn!(?reason, "Frame dropped"),
                Some(other) => debug!(?other, "Demo event"),
                None => break,
            }
        }
    })
    .await
    .context("Timed out waiting for replies")?;

    let elapsed = started.elapsed();
    manager.disconnect().context("Failed to request disconnect")?;
    let stats = manager.stats();
    manager.shutdown();

    Ok(DemoReport {
        succeeded,
        failed,
        elapsed,
        stats,
    })
}
