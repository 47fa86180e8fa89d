use std::fmt;
use thiserror::Error;

/// Commands accepted by a duplex, message-oriented transport such as a
/// WebSocket client.
///
/// Every method only enqueues work on the transport's own I/O machinery;
/// outcomes come back as [`TransportEvent`]s on the event channel handed to
/// the manager.
pub trait Transport: Send + Sync + 'static {
    fn connect(&self);

    fn disconnect(&self);

    /// Queue one frame for writing
    fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Transport-level keep-alive probe
    fn ping(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Events emitted by the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String, code: u16 },
    Text(String),
    Binary(Vec<u8>),
    Error(TransportError),
    Ping,
    Pong,
    ViabilityChanged(bool),
    ReconnectSuggested,
    Cancelled,
}

impl TransportEvent {
    /// Normalize an inbound data frame to bytes
    pub fn into_frame(self) -> Result<Vec<u8>, TransportEvent> {
        match self {
            TransportEvent::Text(text) => Ok(text.into_bytes()),
            TransportEvent::Binary(bytes) => Ok(bytes),
            other => Err(other),
        }
    }
}

/// Broad category of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// TLS or certificate trust failure
    Security,
    /// HTTP upgrade handshake failure
    Upgrade,
    Io,
    Protocol,
    /// Writing on a closed connection
    Closed,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::Security => "security",
            TransportErrorKind::Upgrade => "upgrade",
            TransportErrorKind::Io => "io",
            TransportErrorKind::Protocol => "protocol",
            TransportErrorKind::Closed => "closed",
            TransportErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} transport error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn closed() -> Self {
        Self::new(TransportErrorKind::Closed, "connection is closed")
    }

    /// Failures that are remedied by reconnecting after a pause
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::Security | TransportErrorKind::Upgrade
        )
    }
}

/// Signal from the network-reachability monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable,
}

/// Signal from the application-lifecycle source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    EnteredBackground,
    EnteredForeground,
}
