use crate::messages::{CodecError, Envelope, MessageId};
use crate::network::stats::Counters;
use crate::network::transport::Transport;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, instrument, trace, warn};

/// Minimum spacing between two physical writes
pub const MIN_SEND_INTERVAL: Duration = Duration::from_millis(10);

/// Computes when each submitted write may hit the transport.
///
/// The last-send mark advances at submission time, so a burst spreads out
/// cumulatively instead of every message racing against one stale mark.
#[derive(Debug)]
pub(crate) struct Pacer {
    min_interval: Duration,
    last_scheduled: Option<Instant>,
}

impl Pacer {
    pub(crate) fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_scheduled: None,
        }
    }

    /// Reserve the next write slot for a submission made at `now`
    pub(crate) fn schedule(&mut self, now: Instant) -> Instant {
        let slot = match self.last_scheduled {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => {
                last + self.min_interval
            }
            _ => now,
        };
        self.last_scheduled = Some(slot);
        slot
    }
}

struct PacedWrite {
    id: MessageId,
    frame: Vec<u8>,
    not_before: Instant,
}

/// Serialized, rate-limited outbound lane.
///
/// Writes leave in submission order through a single task; pacing delays are
/// non-decreasing along that order.
#[derive(Clone)]
pub struct SendScheduler {
    lane: mpsc::UnboundedSender<PacedWrite>,
    pacer: Arc<Mutex<Pacer>>,
}

impl SendScheduler {
    pub(crate) fn spawn(
        transport: Arc<dyn Transport>,
        min_interval: Duration,
        counters: Arc<Counters>,
    ) -> (Self, JoinHandle<()>) {
        let (lane, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_lane(rx, transport, counters));
        let scheduler = Self {
            lane,
            pacer: Arc::new(Mutex::new(Pacer::new(min_interval))),
        };
        (scheduler, handle)
    }

    /// Encode `envelope` and queue it behind earlier writes.
    ///
    /// Returns the pacing delay applied to this write.
    #[instrument(level = "debug", skip(self, envelope), fields(id = envelope.id()))]
    pub fn enqueue(&self, envelope: &dyn Envelope) -> Result<Duration, CodecError> {
        let frame = encode(envelope)?;
        Ok(self.queue(envelope.id(), frame))
    }

    /// Queue an already encoded frame and return its pacing delay
    pub(crate) fn queue(&self, id: MessageId, frame: Vec<u8>) -> Duration {
        // The pacer lock is held while queueing so lane order matches slot order.
        let mut pacer = self.pacer.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let not_before = pacer.schedule(now);
        let delay = not_before.saturating_duration_since(now);
        trace!(id, delay_ms = delay.as_millis() as u64, "Write scheduled");

        let write = PacedWrite {
            id,
            frame,
            not_before,
        };
        if self.lane.send(write).is_err() {
            warn!(id, "Send lane has shut down, dropping write");
        }
        delay
    }
}

/// Encode an outbound message, logging the failure
pub(crate) fn encode(envelope: &dyn Envelope) -> Result<Vec<u8>, CodecError> {
    envelope.encode().map_err(|e| {
        warn!(id = envelope.id(), error = %e, "Failed to encode outbound message");
        e
    })
}

async fn run_lane(
    mut rx: mpsc::UnboundedReceiver<PacedWrite>,
    transport: Arc<dyn Transport>,
    counters: Arc<Counters>,
) {
    while let Some(write) = rx.recv().await {
        sleep_until(write.not_before).await;
        match transport.send(write.frame) {
            Ok(()) => {
                counters.frame_written();
                debug!(id = write.id, "Frame written");
            }
            Err(e) => {
                counters.write_failed();
                warn!(id = write.id, error = %e, "Transport rejected frame");
            }
        }
    }
    debug!("Send lane closed");
}
