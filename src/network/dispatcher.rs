use crate::messages::{InboundMessage, TypeRegistry};
use crate::network::events::{DropReason, EventHandler, Inbound, RouteFailure};
use crate::network::pending::PendingTable;
use crate::network::stats::Counters;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Result of dispatching one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Routed to the message handler
    Delivered,
    /// Routed to the failure handler
    Failed,
    /// No shape accepted the frame
    Dropped,
}

/// Classifies inbound frames, resolves their pending entries and routes
/// them to the application.
pub(crate) struct Dispatcher<M> {
    registry: Arc<TypeRegistry<M>>,
    table: Arc<PendingTable>,
    handler: Arc<dyn EventHandler<M>>,
    counters: Arc<Counters>,
}

impl<M: InboundMessage> Dispatcher<M> {
    pub(crate) fn new(
        registry: Arc<TypeRegistry<M>>,
        table: Arc<PendingTable>,
        handler: Arc<dyn EventHandler<M>>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            registry,
            table,
            handler,
            counters,
        }
    }

    #[instrument(level = "debug", skip(self, frame), fields(frame_size = frame.len()))]
    pub(crate) fn dispatch(&self, frame: &[u8]) -> DispatchOutcome {
        let (shape, message) = match self.registry.classify(frame) {
            Ok(classified) => classified,
            Err(error) => {
                self.counters.frame_dropped();
                let reason = if error.is_invalid_route() {
                    warn!(error = %error, "Dropping frame with an invalid route");
                    DropReason::InvalidRoute(error)
                } else {
                    debug!(error = %error, "Dropping unrecognized frame");
                    DropReason::Unmatched(error)
                };
                self.handler.on_frame_dropped(reason);
                return DispatchOutcome::Dropped;
            }
        };

        let id = message.id();
        let resolved = self.table.resolve(id);
        debug!(id, shape, correlated = resolved.is_some(), "Inbound message classified");

        if !message.is_failure() {
            self.handler.on_message(message);
            return DispatchOutcome::Delivered;
        }

        let error = message.error().cloned().unwrap_or_default();
        let route = message
            .route()
            .map(str::to_string)
            .or_else(|| resolved.as_ref().map(|entry| entry.route().to_string()))
            .unwrap_or_default();
        warn!(id, route = %route, code = error.error_code, "Peer reported a failure");
        self.handler.on_route_failure(RouteFailure {
            route,
            error,
            envelope: Inbound::Decoded(message),
        });
        DispatchOutcome::Failed
    }
}
