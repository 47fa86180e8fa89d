pub mod cli;
pub mod config;
pub mod messages;
pub mod network;

// Re-export key types for easy testing
pub use config::{ConfigError, ManagerConfig};
pub use messages::{
    Empty, Envelope, ErrorStatus, InboundMessage, MessageId, Request, Response, TypeRegistry,
};
pub use network::{
    ChannelHandler, ConnectionManager, ConnectionState, EventHandler, ManagerBuilder, ManagerEvent,
    Transport, TransportEvent,
};
