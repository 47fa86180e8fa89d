use crate::network::transport::{Lifecycle, Reachability, TransportError, TransportEvent};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Delay before reconnecting after a transient failure or an unexpected cancel
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Pause between returning to the foreground and reconnecting
pub const DEFAULT_FOREGROUND_SETTLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Everything that can move the connection state
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    ConnectRequested,
    DisconnectRequested,
    Transport(TransportEvent),
    Reachability(Reachability),
    Lifecycle(Lifecycle),
    /// A delayed reconnect came due
    ReconnectDue,
    /// The settle delay after entering the foreground elapsed
    ForegroundSettled,
}

/// Side effects requested by the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Connect,
    Disconnect,
    ScheduleReconnect(Duration),
    ScheduleForegroundConnect(Duration),
    NotifyConnected,
    NotifyDisconnected { reason: String, code: u16 },
    NotifyTransportError(TransportError),
}

/// Single authority over the connection state.
///
/// Transport, reachability, lifecycle and application requests all arrive as
/// [`Signal`]s through [`ConnectionStateMachine::handle`]; the machine never
/// performs I/O itself and only returns [`Action`]s for its owner to execute.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    in_background: bool,
    /// Set by an application disconnect, cleared by an application connect
    user_closed: bool,
    reconnect_delay: Duration,
    settle_delay: Duration,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY, DEFAULT_FOREGROUND_SETTLE_DELAY)
    }
}

impl ConnectionStateMachine {
    pub fn new(reconnect_delay: Duration, settle_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            in_background: false,
            user_closed: false,
            reconnect_delay,
            settle_delay,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn in_background(&self) -> bool {
        self.in_background
    }

    /// Keep-alive pings only run on a live, foregrounded connection
    pub fn keep_alive_active(&self) -> bool {
        self.is_connected() && !self.in_background
    }

    pub fn handle(&mut self, signal: Signal) -> Vec<Action> {
        let mut actions = Vec::new();
        let before = self.state;

        match signal {
            Signal::ConnectRequested => {
                self.user_closed = false;
                self.request_connect(&mut actions);
            }
            Signal::ReconnectDue if self.user_closed => {
                debug!("Delayed reconnect ignored after an application disconnect");
            }
            Signal::ReconnectDue | Signal::ForegroundSettled => {
                self.request_connect(&mut actions);
            }
            Signal::DisconnectRequested => {
                self.user_closed = true;
                self.request_disconnect(&mut actions);
            }
            Signal::Transport(event) => self.on_transport(event, &mut actions),
            Signal::Reachability(Reachability::Reachable) => {
                if !matches!(
                    self.state,
                    ConnectionState::Connected | ConnectionState::Connecting
                ) {
                    debug!("Network reachable again, reconnecting");
                    actions.push(Action::ScheduleReconnect(Duration::ZERO));
                }
            }
            Signal::Reachability(Reachability::Unreachable) => {
                debug!("Network unreachable");
            }
            Signal::Lifecycle(Lifecycle::EnteredBackground) => {
                self.in_background = true;
                self.request_disconnect(&mut actions);
            }
            Signal::Lifecycle(Lifecycle::EnteredForeground) => {
                self.in_background = false;
                actions.push(Action::ScheduleForegroundConnect(self.settle_delay));
            }
        }

        if before != self.state {
            info!(from = %before, to = %self.state, "Connection state changed");
        }
        actions
    }

    fn request_connect(&mut self, actions: &mut Vec<Action>) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            debug!(state = %self.state, "Connect ignored, already connecting or connected");
            return;
        }
        if self.in_background {
            debug!("Connect ignored while in background");
            return;
        }
        self.state = ConnectionState::Connecting;
        actions.push(Action::Connect);
    }

    fn request_disconnect(&mut self, actions: &mut Vec<Action>) {
        if self.state == ConnectionState::Disconnected {
            debug!("Disconnect ignored, already disconnected");
            return;
        }
        self.state = ConnectionState::Disconnecting;
        actions.push(Action::Disconnect);
    }

    fn on_transport(&mut self, event: TransportEvent, actions: &mut Vec<Action>) {
        match event {
            TransportEvent::Connected => {
                self.state = ConnectionState::Connected;
                actions.push(Action::NotifyConnected);
            }
            TransportEvent::Disconnected { reason, code } => {
                self.state = ConnectionState::Disconnected;
                actions.push(Action::NotifyDisconnected { reason, code });
            }
            TransportEvent::Error(error) => {
                let transient = error.is_transient();
                actions.push(Action::NotifyTransportError(error));
                if transient {
                    actions.push(Action::ScheduleReconnect(self.reconnect_delay));
                }
            }
            TransportEvent::ReconnectSuggested => {
                self.state = ConnectionState::Disconnected;
                self.request_connect(actions);
            }
            TransportEvent::Cancelled => {
                let user_initiated = self.state == ConnectionState::Disconnecting;
                self.state = ConnectionState::Disconnected;
                if !user_initiated {
                    actions.push(Action::ScheduleReconnect(self.reconnect_delay));
                }
            }
            TransportEvent::ViabilityChanged(viable) => {
                if viable && self.state == ConnectionState::Disconnected {
                    self.request_connect(actions);
                } else if self.state != ConnectionState::Connecting {
                    self.state = if viable {
                        ConnectionState::Connected
                    } else {
                        ConnectionState::Disconnected
                    };
                }
            }
            TransportEvent::Text(_)
            | TransportEvent::Binary(_)
            | TransportEvent::Ping
            | TransportEvent::Pong => {}
        }
    }
}
