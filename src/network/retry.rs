use crate::messages::{Envelope, InboundMessage, MessageId, Response};
use crate::network::events::{DropReason, EventHandler, Inbound, RouteFailure};
use crate::network::pending::{PendingTable, TimeoutDecision};
use crate::network::scheduler::SendScheduler;
use crate::network::stats::Counters;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, instrument, trace, warn};

/// Per-request timers driving the retry policy.
///
/// Each tracked request owns one timer task. The task sleeps for `timeout`,
/// asks the pending table what to do, and either resends, delivers the
/// retries-exhausted sentinel, or exits because the request was resolved.
pub(crate) struct RetryEngine<M> {
    table: Arc<PendingTable>,
    scheduler: SendScheduler,
    handler: Arc<dyn EventHandler<M>>,
    counters: Arc<Counters>,
    timeout: Duration,
    max_retries: u32,
}

impl<M> Clone for RetryEngine<M> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            scheduler: self.scheduler.clone(),
            handler: Arc::clone(&self.handler),
            counters: Arc::clone(&self.counters),
            timeout: self.timeout,
            max_retries: self.max_retries,
        }
    }
}

impl<M: InboundMessage> RetryEngine<M> {
    pub(crate) fn new(
        table: Arc<PendingTable>,
        scheduler: SendScheduler,
        handler: Arc<dyn EventHandler<M>>,
        counters: Arc<Counters>,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            table,
            scheduler,
            handler,
            counters,
            timeout,
            max_retries,
        }
    }

    /// Start tracking a request that awaits an answer
    pub(crate) fn track(&self, envelope: Arc<dyn Envelope>) {
        let id = envelope.id();
        let engine = self.clone();
        self.table.insert_with(envelope, move |generation| {
            Some(tokio::spawn(engine.watch(id, generation)).abort_handle())
        });
        trace!(id, timeout_ms = self.timeout.as_millis() as u64, "Tracking request");
    }

    #[instrument(level = "debug", skip(self))]
    async fn watch(self, id: MessageId, generation: u64) {
        loop {
            sleep(self.timeout).await;

            match self.table.on_timeout(id, generation, self.max_retries) {
                TimeoutDecision::Stale => {
                    trace!(id, "Timer fired for a resolved request");
                    return;
                }
                TimeoutDecision::Retry { envelope, attempt } => {
                    info!(id, attempt, max_retries = self.max_retries, "No reply yet, resending");
                    self.counters.retry_sent();
                    if let Err(error) = self.scheduler.enqueue(envelope.as_ref()) {
                        self.counters.frame_dropped();
                        self.handler
                            .on_frame_dropped(DropReason::Encode { id, error });
                    }
                }
                TimeoutDecision::Exhausted(entry) => {
                    warn!(
                        id,
                        route = entry.route(),
                        retries = entry.retries,
                        "Request exhausted its retries"
                    );
                    self.counters.retries_exhausted();
                    let synthetic = Response::<Value>::retries_exhausted(entry.envelope().as_ref());
                    let failure = RouteFailure {
                        route: entry.route().to_string(),
                        error: synthetic.error.clone(),
                        envelope: Inbound::Synthetic(synthetic),
                    };
                    self.handler.on_route_failure(failure);
                    return;
                }
            }
        }
    }
}
