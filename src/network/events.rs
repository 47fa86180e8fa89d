use crate::messages::{CodecError, ErrorStatus, InboundMessage, MessageId, Response};
use crate::network::transport::TransportError;
use serde_json::Value;
use tokio::sync::mpsc;

/// The envelope handed to a failure handler
#[derive(Debug)]
pub enum Inbound<M> {
    /// Decoded from a frame sent by the peer
    Decoded(M),
    /// Produced locally after the request exhausted its retries
    Synthetic(Response<Value>),
}

impl<M: InboundMessage> Inbound<M> {
    pub fn id(&self) -> MessageId {
        match self {
            Inbound::Decoded(message) => message.id(),
            Inbound::Synthetic(response) => response.id,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Inbound::Synthetic(_))
    }
}

/// A request that failed, either remotely or by running out of retries
#[derive(Debug)]
pub struct RouteFailure<M> {
    pub route: String,
    pub error: ErrorStatus,
    pub envelope: Inbound<M>,
}

/// Why a frame or an outbound message was dropped
#[derive(Debug)]
pub enum DropReason {
    /// No registered shape decoded the inbound frame
    Unmatched(CodecError),
    /// A shape parsed the frame but its route self-check failed
    InvalidRoute(CodecError),
    /// An outbound message stopped encoding between attempts
    Encode { id: MessageId, error: CodecError },
}

/// Application callbacks. Every method defaults to doing nothing.
///
/// Callbacks run on the manager's internal tasks and must not block.
pub trait EventHandler<M>: Send + Sync + 'static {
    fn on_connected(&self) {}

    fn on_disconnected(&self, _reason: &str, _code: u16) {}

    fn on_message(&self, _message: M) {}

    fn on_route_failure(&self, _failure: RouteFailure<M>) {}

    fn on_transport_error(&self, _error: &TransportError) {}

    fn on_frame_dropped(&self, _reason: DropReason) {}
}

/// Handler that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl<M> EventHandler<M> for NoopHandler {}

/// Events as delivered by [`ChannelHandler`]
#[derive(Debug)]
pub enum ManagerEvent<M> {
    Connected,
    Disconnected { reason: String, code: u16 },
    Message(M),
    RouteFailure(RouteFailure<M>),
    TransportError(TransportError),
    FrameDropped(DropReason),
}

/// Forwards every callback into an unbounded channel
#[derive(Debug)]
pub struct ChannelHandler<M> {
    tx: mpsc::UnboundedSender<ManagerEvent<M>>,
}

impl<M> ChannelHandler<M> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ManagerEvent<M>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ManagerEvent<M>) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}

impl<M: Send + 'static> EventHandler<M> for ChannelHandler<M> {
    fn on_connected(&self) {
        self.forward(ManagerEvent::Connected);
    }

    fn on_disconnected(&self, reason: &str, code: u16) {
        self.forward(ManagerEvent::Disconnected {
            reason: reason.to_string(),
            code,
        });
    }

    fn on_message(&self, message: M) {
        self.forward(ManagerEvent::Message(message));
    }

    fn on_route_failure(&self, failure: RouteFailure<M>) {
        self.forward(ManagerEvent::RouteFailure(failure));
    }

    fn on_transport_error(&self, error: &TransportError) {
        self.forward(ManagerEvent::TransportError(error.clone()));
    }

    fn on_frame_dropped(&self, reason: DropReason) {
        self.forward(ManagerEvent::FrameDropped(reason));
    }
}
