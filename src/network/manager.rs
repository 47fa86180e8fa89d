use crate::config::{ConfigError, ManagerConfig};
use crate::messages::{CodecError, Envelope, InboundMessage, MessageId, TypeRegistry};
use crate::network::dispatcher::Dispatcher;
use crate::network::events::{EventHandler, NoopHandler};
use crate::network::pending::PendingTable;
use crate::network::retry::RetryEngine;
use crate::network::scheduler::{self, SendScheduler};
use crate::network::state::{Action, ConnectionState, ConnectionStateMachine, Signal};
use crate::network::stats::{Counters, ManagerStats};
use crate::network::transport::{Lifecycle, Reachability, Transport, TransportEvent};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, trace, warn};

#[derive(Error, Debug)]
pub enum SendError {
    #[error("Failed to encode message: {0}")]
    Encode(#[from] CodecError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManagerError {
    #[error("Connection manager has shut down")]
    Closed,
}

/// Assembles a [`ConnectionManager`] from its collaborators
pub struct ManagerBuilder<M> {
    transport: Arc<dyn Transport>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    registry: TypeRegistry<M>,
    config: ManagerConfig,
    handler: Arc<dyn EventHandler<M>>,
    reachability: Option<mpsc::UnboundedReceiver<Reachability>>,
    lifecycle: Option<mpsc::UnboundedReceiver<Lifecycle>>,
}

impl<M: InboundMessage> ManagerBuilder<M> {
    pub fn new(
        transport: Arc<dyn Transport>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        registry: TypeRegistry<M>,
    ) -> Self {
        Self {
            transport,
            transport_events,
            registry,
            config: ManagerConfig::default(),
            handler: Arc::new(NoopHandler),
            reachability: None,
            lifecycle: None,
        }
    }

    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn handler<H: EventHandler<M>>(mut self, handler: H) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    pub fn shared_handler(mut self, handler: Arc<dyn EventHandler<M>>) -> Self {
        self.handler = handler;
        self
    }

    /// Feed network-reachability signals into the connection state machine
    pub fn reachability(mut self, signals: mpsc::UnboundedReceiver<Reachability>) -> Self {
        self.reachability = Some(signals);
        self
    }

    /// Feed application-lifecycle signals into the connection state machine
    pub fn lifecycle(mut self, signals: mpsc::UnboundedReceiver<Lifecycle>) -> Self {
        self.lifecycle = Some(signals);
        self
    }

    /// Spawn the manager's tasks on the current tokio runtime
    pub fn start(self) -> Result<ConnectionManager<M>, ConfigError> {
        self.config.validate()?;
        let config = self.config;

        let counters = Arc::new(Counters::default());
        let table = Arc::new(PendingTable::new());
        let (scheduler, lane) = SendScheduler::spawn(
            Arc::clone(&self.transport),
            config.min_send_interval,
            Arc::clone(&counters),
        );
        let engine = RetryEngine::new(
            Arc::clone(&table),
            scheduler.clone(),
            Arc::clone(&self.handler),
            Arc::clone(&counters),
            config.timeout,
            config.max_retries,
        );
        let dispatcher = Dispatcher::new(
            Arc::new(self.registry),
            Arc::clone(&table),
            Arc::clone(&self.handler),
            Arc::clone(&counters),
        );

        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let keep_alive = config.keep_alive_interval.map(|period| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let actor = Actor {
            machine: ConnectionStateMachine::new(
                config.reconnect_delay,
                config.foreground_settle_delay,
            ),
            transport: self.transport,
            dispatcher,
            handler: self.handler,
            state_tx,
            signals_tx: signals_tx.clone(),
            signals_rx,
            transport_events: self.transport_events,
            reachability: self.reachability,
            lifecycle: self.lifecycle,
            keep_alive,
        };
        let actor = tokio::spawn(actor.run());

        info!(
            timeout_ms = config.timeout.as_millis() as u64,
            max_retries = config.max_retries,
            "Connection manager started"
        );

        Ok(ConnectionManager {
            signals: signals_tx,
            scheduler,
            engine,
            table,
            state: state_rx,
            counters,
            tasks: Arc::new(vec![actor.abort_handle(), lane.abort_handle()]),
        })
    }
}

/// Application-facing handle to a managed connection. Clones share the same
/// connection.
pub struct ConnectionManager<M> {
    signals: mpsc::UnboundedSender<Signal>,
    scheduler: SendScheduler,
    engine: RetryEngine<M>,
    table: Arc<PendingTable>,
    state: watch::Receiver<ConnectionState>,
    counters: Arc<Counters>,
    tasks: Arc<Vec<AbortHandle>>,
}

impl<M> Clone for ConnectionManager<M> {
    fn clone(&self) -> Self {
        Self {
            signals: self.signals.clone(),
            scheduler: self.scheduler.clone(),
            engine: self.engine.clone(),
            table: Arc::clone(&self.table),
            state: self.state.clone(),
            counters: Arc::clone(&self.counters),
            tasks: Arc::clone(&self.tasks),
        }
    }
}

impl<M: InboundMessage> ConnectionManager<M> {
    pub fn builder(
        transport: Arc<dyn Transport>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        registry: TypeRegistry<M>,
    ) -> ManagerBuilder<M> {
        ManagerBuilder::new(transport, transport_events, registry)
    }

    pub fn connect(&self) -> Result<(), ManagerError> {
        self.signal(Signal::ConnectRequested)
    }

    pub fn disconnect(&self) -> Result<(), ManagerError> {
        self.signal(Signal::DisconnectRequested)
    }

    fn signal(&self, signal: Signal) -> Result<(), ManagerError> {
        self.signals.send(signal).map_err(|_| ManagerError::Closed)
    }

    /// Submit a message. Requests that await an answer are tracked until a
    /// reply with the same id arrives or their retries run out.
    pub fn send<E: Envelope>(&self, envelope: E) -> Result<(), SendError> {
        self.submit(Arc::new(envelope))
    }

    /// Encode, register the pending entry, then queue the write. A reply can
    /// only arrive after its entry exists.
    #[instrument(
        level = "debug",
        skip(self, envelope),
        fields(id = envelope.id(), route = envelope.route())
    )]
    pub fn submit(&self, envelope: Arc<dyn Envelope>) -> Result<(), SendError> {
        let id = envelope.id();
        let frame = scheduler::encode(envelope.as_ref())?;
        if envelope.awaits_answer() {
            self.engine.track(envelope);
        }
        let delay = self.scheduler.queue(id, frame);
        trace!(delay_ms = delay.as_millis() as u64, "Message queued");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_pending(&self, id: MessageId) -> bool {
        self.table.contains(id)
    }

    pub fn pending_count(&self) -> usize {
        self.table.len()
    }

    pub fn stats(&self) -> ManagerStats {
        self.counters.snapshot(self.state(), self.table.len())
    }

    /// Stop the actor and the send lane. Request timers still armed fire
    /// into an empty lane and are otherwise harmless.
    pub fn shutdown(&self) {
        for task in self.tasks.iter() {
            task.abort();
        }
        info!("Connection manager shut down");
    }
}

/// Owns the state machine and the transport's connect/disconnect commands.
/// Every event source feeds this one task.
struct Actor<M> {
    machine: ConnectionStateMachine,
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher<M>,
    handler: Arc<dyn EventHandler<M>>,
    state_tx: watch::Sender<ConnectionState>,
    signals_tx: mpsc::UnboundedSender<Signal>,
    signals_rx: mpsc::UnboundedReceiver<Signal>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    reachability: Option<mpsc::UnboundedReceiver<Reachability>>,
    lifecycle: Option<mpsc::UnboundedReceiver<Lifecycle>>,
    keep_alive: Option<Interval>,
}

impl<M: InboundMessage> Actor<M> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(signal) = self.signals_rx.recv() => self.apply(signal),
                event = self.transport_events.recv() => match event {
                    Some(event) => self.on_transport_event(event),
                    None => {
                        info!("Transport event stream ended, stopping connection manager");
                        break;
                    }
                },
                signal = recv_optional(&mut self.reachability) => match signal {
                    Some(signal) => self.apply(Signal::Reachability(signal)),
                    None => self.reachability = None,
                },
                signal = recv_optional(&mut self.lifecycle) => match signal {
                    Some(signal) => self.apply(Signal::Lifecycle(signal)),
                    None => self.lifecycle = None,
                },
                _ = tick_optional(&mut self.keep_alive) => self.on_keep_alive(),
            }
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event.into_frame() {
            Ok(frame) => {
                self.dispatcher.dispatch(&frame);
            }
            Err(TransportEvent::Ping) => trace!("Ping received"),
            Err(TransportEvent::Pong) => trace!("Pong received"),
            Err(other) => self.apply(Signal::Transport(other)),
        }
    }

    fn on_keep_alive(&self) {
        if !self.machine.keep_alive_active() {
            return;
        }
        trace!("Sending keep-alive ping");
        if let Err(e) = self.transport.ping() {
            warn!(error = %e, "Keep-alive ping failed");
        }
    }

    fn apply(&mut self, signal: Signal) {
        let actions = self.machine.handle(signal);
        self.state_tx.send_replace(self.machine.state());
        for action in actions {
            self.execute(action);
        }
    }

    fn execute(&self, action: Action) {
        match action {
            Action::Connect => {
                info!("Connecting transport");
                self.transport.connect();
            }
            Action::Disconnect => {
                info!("Disconnecting transport");
                self.transport.disconnect();
            }
            Action::ScheduleReconnect(delay) => self.schedule(delay, Signal::ReconnectDue),
            Action::ScheduleForegroundConnect(delay) => {
                self.schedule(delay, Signal::ForegroundSettled)
            }
            Action::NotifyConnected => self.handler.on_connected(),
            Action::NotifyDisconnected { reason, code } => {
                self.handler.on_disconnected(&reason, code)
            }
            Action::NotifyTransportError(error) => {
                warn!(error = %error, "Transport error");
                self.handler.on_transport_error(&error);
            }
        }
    }

    /// Deliver `signal` after `delay`. These timers are never cancelled; the
    /// state machine ignores a reconnect that is no longer needed.
    fn schedule(&self, delay: Duration, signal: Signal) {
        debug!(delay_ms = delay.as_millis() as u64, ?signal, "Scheduling signal");
        let signals = self.signals_tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = signals.send(signal);
        });
    }
}

async fn recv_optional<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn tick_optional(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
