pub mod dispatcher;
pub mod events;
pub mod manager;
pub mod pending;
mod retry;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod transport;

pub use dispatcher::DispatchOutcome;
pub use events::{
    ChannelHandler, DropReason, EventHandler, Inbound, ManagerEvent, NoopHandler, RouteFailure,
};
pub use manager::{ConnectionManager, ManagerBuilder, ManagerError, SendError};
pub use pending::{PendingEntry, PendingTable};
pub use scheduler::MIN_SEND_INTERVAL;
pub use state::{Action, ConnectionState, ConnectionStateMachine, Signal};
pub use stats::ManagerStats;
pub use transport::{
    Lifecycle, Reachability, Transport, TransportError, TransportErrorKind, TransportEvent,
};
