//! Reconnecting transport
//!
//! A [`Transport`] is a handle to an actor task that owns exactly one
//! physical connection at a time. The actor connects, reconnects with the
//! configured [`ReconnectionStrategy`] when the connection drops, and queues
//! sends while disconnected.
//!
//! # Sending
//!
//! [`Transport::send`] never blocks. If the connection is open the payload is
//! written right away; otherwise it waits in the deferred queue until the
//! next open or until the send timeout passes, whichever comes first.
//!
//! # Events
//!
//! - [`Transport::on_message`]: every inbound payload, in arrival order
//! - [`Transport::on_state_change`]: every surfaced change between
//!   [`ConnectionState::Open`] and [`ConnectionState::Closed`]
//!
//! Repeated failed attempts while closed produce a single `Closed` event.
//! Callbacks run on the actor task; they must not block.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tether_client::{ConnectionState, Transport, TransportConfig};
//!
//! # async fn example() -> tether_core::Result<()> {
//! let transport = Transport::connect("ws://localhost:8080/rpc", TransportConfig::default());
//!
//! let _messages = transport.on_message(|text| println!("<- {text}"));
//! let _states = transport.on_state_change(|state| println!("state: {state}"));
//!
//! transport.opened().await?;
//! transport.send(r#"{"cancelStream":{"id":"1"}}"#).await?;
//! transport.destroy();
//! # Ok(())
//! # }
//! ```

use crate::connection_state::ConnectionState;
use crate::connector::{BoxConnection, Connector, WsConnector};
use crate::deferred::{DeferredQueue, DeferredSend, Settle};
use crate::listeners::{ListenerHandle, Listeners};
use crate::metrics::ClientMetrics;
use crate::reconnect::{DelaySequence, ReconnectionStrategy};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_core::{Error, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{error::Elapsed, Instant, Sleep};

/// Transport settings
pub struct TransportConfig {
    /// Budget for a single connect attempt
    pub connect_timeout: Duration,
    /// How long a send may wait for an open connection
    pub send_timeout: Duration,
    pub strategy: Box<dyn ReconnectionStrategy>,
    pub(crate) metrics: Option<Arc<ClientMetrics>>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            send_timeout: Duration::from_secs(1),
            strategy: Box::new(DelaySequence::default()),
            metrics: None,
        }
    }
}

impl TransportConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_strategy(mut self, strategy: impl ReconnectionStrategy) -> Self {
        self.strategy = Box::new(strategy);
        self
    }

    pub(crate) fn with_metrics_handle(mut self, metrics: Option<Arc<ClientMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("connect_timeout", &self.connect_timeout)
            .field("send_timeout", &self.send_timeout)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

enum Command {
    Send { payload: String, settle: Settle },
    Destroy,
}

struct Shared {
    messages: Arc<Listeners<str>>,
    states: Arc<Listeners<ConnectionState>>,
    state: watch::Sender<ConnectionState>,
    destroyed: AtomicBool,
}

/// Handle to a transport actor
///
/// Clones share the actor. The actor stops when [`Transport::destroy`] is
/// called or when the last handle is dropped.
#[derive(Clone)]
pub struct Transport {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl Transport {
    /// Start a transport dialing a WebSocket URL
    ///
    /// Must be called within a tokio runtime.
    pub fn connect(url: impl Into<String>, config: TransportConfig) -> Self {
        Self::with_connector(WsConnector::new(url), config)
    }

    /// Start a transport over any connector
    ///
    /// Must be called within a tokio runtime.
    pub fn with_connector(connector: impl Connector, config: TransportConfig) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let shared = Arc::new(Shared {
            messages: Arc::new(Listeners::new()),
            states: Arc::new(Listeners::new()),
            state,
            destroyed: AtomicBool::new(false),
        });

        let actor = Actor {
            connector: Box::new(connector),
            commands: commands_rx,
            shared: Arc::clone(&shared),
            deferred: DeferredQueue::new(),
            strategy: config.strategy,
            connect_timeout: config.connect_timeout,
            send_timeout: config.send_timeout,
            attempt: 0,
            surfaced: ConnectionState::Closed,
            metrics: config.metrics,
        };
        tokio::spawn(actor.run());

        Self { commands, shared }
    }

    /// Send a payload, resolving once it is written
    ///
    /// The payload is enqueued before this returns; the future only reports
    /// the outcome. Fails with [`Error::SendTimeout`] if no connection opens
    /// within the send timeout, or [`Error::Destroyed`] after shutdown.
    pub fn send(
        &self,
        payload: impl Into<String>,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        self.send_with(
            payload.into(),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        async move { rx.await.unwrap_or(Err(Error::Destroyed)) }
    }

    /// Enqueue a payload with a completion callback
    ///
    /// `settle` runs on the actor task, or inline when the transport is
    /// already destroyed.
    pub(crate) fn send_with(&self, payload: String, settle: Settle) {
        if self.shared.destroyed.load(Ordering::Acquire) {
            settle(Err(Error::Destroyed));
            return;
        }
        if let Err(mpsc::error::SendError(Command::Send { settle, .. })) =
            self.commands.send(Command::Send { payload, settle })
        {
            settle(Err(Error::Destroyed));
        }
    }

    /// Called with every inbound payload
    pub fn on_message(&self, listener: impl Fn(&str) + Send + Sync + 'static) -> ListenerHandle {
        self.shared.messages.add(listener)
    }

    /// Called on every surfaced open/closed transition
    pub fn on_state_change(
        &self,
        listener: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.shared.states.add(move |state: &ConnectionState| listener(*state))
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Wait until the connection is open
    ///
    /// Returns immediately if it already is. Fails with [`Error::Destroyed`]
    /// once the transport is shut down.
    pub async fn opened(&self) -> Result<()> {
        let mut rx = self.shared.state.subscribe();
        let state = *rx
            .wait_for(|state| matches!(state, ConnectionState::Open | ConnectionState::Destroyed))
            .await
            .map_err(|_| Error::Destroyed)?;
        if state.is_destroyed() {
            Err(Error::Destroyed)
        } else {
            Ok(())
        }
    }

    /// Stop reconnecting and close the connection for good
    ///
    /// Queued sends fail with [`Error::Destroyed`], as does every later send.
    pub fn destroy(&self) {
        if !self.shared.destroyed.swap(true, Ordering::AcqRel) {
            let _ = self.commands.send(Command::Destroy);
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("state", &self.state())
            .field("message_listeners", &self.shared.messages.len())
            .field("state_listeners", &self.shared.states.len())
            .finish()
    }
}

type ConnectAttempt = BoxFuture<'static, std::result::Result<Result<BoxConnection>, Elapsed>>;

enum Phase {
    Connecting(ConnectAttempt),
    Open(BoxConnection),
    Closed(Pin<Box<Sleep>>),
}

enum Step {
    Stay,
    Next(Phase),
    Stop,
}

struct Actor {
    connector: Box<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Shared>,
    deferred: DeferredQueue,
    strategy: Box<dyn ReconnectionStrategy>,
    connect_timeout: Duration,
    send_timeout: Duration,
    /// Failed attempts since the last open
    attempt: u32,
    /// Last state reported to listeners
    surfaced: ConnectionState,
    metrics: Option<Arc<ClientMetrics>>,
}

impl Actor {
    async fn run(mut self) {
        let mut phase = self.start_connecting();

        loop {
            let step = match &mut phase {
                Phase::Connecting(attempt) => tokio::select! {
                    outcome = attempt => Step::Next(self.on_connect_outcome(outcome).await),
                    command = self.commands.recv() => self.defer(command),
                    _ = sleep_until_deadline(self.deferred.next_deadline()) => {
                        self.expire_deferred();
                        Step::Stay
                    }
                },
                Phase::Closed(delay) => tokio::select! {
                    _ = delay.as_mut() => Step::Next(self.start_connecting()),
                    command = self.commands.recv() => self.defer(command),
                    _ = sleep_until_deadline(self.deferred.next_deadline()) => {
                        self.expire_deferred();
                        Step::Stay
                    }
                },
                Phase::Open(conn) => tokio::select! {
                    frame = conn.next() => self.on_frame(frame),
                    command = self.commands.recv() => self.write(command, conn).await,
                },
            };

            match step {
                Step::Stay => {}
                Step::Next(next) => phase = next,
                Step::Stop => break,
            }
        }

        self.shutdown(phase).await;
    }

    fn start_connecting(&mut self) -> Phase {
        self.set_state(ConnectionState::Connecting);
        if self.attempt > 0 {
            if let Some(m) = &self.metrics {
                m.record_reconnection_attempt();
            }
        }
        tracing::debug!(attempt = self.attempt, "connecting");
        Phase::Connecting(Box::pin(tokio::time::timeout(
            self.connect_timeout,
            self.connector.connect(),
        )))
    }

    async fn on_connect_outcome(
        &mut self,
        outcome: std::result::Result<Result<BoxConnection>, Elapsed>,
    ) -> Phase {
        match outcome {
            Ok(Ok(conn)) => self.open(conn).await,
            Ok(Err(e)) => {
                tracing::warn!(attempt = self.attempt, error = %e, "connect attempt failed");
                self.close()
            }
            Err(_) => {
                tracing::warn!(
                    attempt = self.attempt,
                    timeout_ms = self.connect_timeout.as_millis() as u64,
                    "connect attempt timed out"
                );
                self.close()
            }
        }
    }

    /// Flush the deferred queue onto a new connection, then surface `open`
    ///
    /// Sends are settled only once the whole queue is written. If a write
    /// fails, the connection never counts as open and every queued payload,
    /// written or not, goes back to the queue in order.
    async fn open(&mut self, mut conn: BoxConnection) -> Phase {
        self.expire_deferred();
        if !self.deferred.is_empty() {
            tracing::debug!(queued = self.deferred.len(), "flushing deferred sends");
        }

        let mut written = Vec::with_capacity(self.deferred.len());
        while let Some(item) = self.deferred.pop_front() {
            if let Err(e) = conn.send(item.payload.clone()).await {
                tracing::warn!(
                    error = %e,
                    written = written.len(),
                    "write failed while flushing deferred sends"
                );
                self.deferred.push_front(item);
                for item in written.into_iter().rev() {
                    self.deferred.push_front(item);
                }
                return self.close();
            }
            written.push(item);
        }
        for item in written {
            (item.settle)(Ok(()));
        }

        if self.attempt > 0 {
            if let Some(m) = &self.metrics {
                m.record_reconnection_success();
            }
        }
        self.attempt = 0;
        self.strategy.reset();

        self.set_state(ConnectionState::Open);
        Phase::Open(conn)
    }

    fn close(&mut self) -> Phase {
        self.set_state(ConnectionState::Closed);
        let delay = self.strategy.next_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        tracing::debug!(
            delay_ms = delay.as_millis() as u64,
            attempt = self.attempt,
            "reconnecting after delay"
        );
        Phase::Closed(Box::pin(tokio::time::sleep(delay)))
    }

    fn on_frame(&mut self, frame: Option<Result<String>>) -> Step {
        match frame {
            Some(Ok(text)) => {
                self.shared.messages.emit(text.as_str());
                Step::Stay
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "connection failed");
                Step::Next(self.close())
            }
            None => {
                tracing::info!("connection closed by peer");
                Step::Next(self.close())
            }
        }
    }

    /// Handle a command while not open
    fn defer(&mut self, command: Option<Command>) -> Step {
        match command {
            Some(Command::Send { payload, settle }) => {
                let deadline = Instant::now() + self.send_timeout;
                self.deferred.push(DeferredSend::new(payload, settle, deadline));
                if let Some(m) = &self.metrics {
                    m.record_deferred_send();
                }
                tracing::debug!(queued = self.deferred.len(), "send deferred until open");
                Step::Stay
            }
            Some(Command::Destroy) | None => Step::Stop,
        }
    }

    /// Handle a command while open
    async fn write(&mut self, command: Option<Command>, conn: &mut BoxConnection) -> Step {
        match command {
            Some(Command::Send { payload, settle }) => match conn.send(payload.clone()).await {
                Ok(()) => {
                    settle(Ok(()));
                    Step::Stay
                }
                Err(e) => {
                    tracing::warn!(error = %e, "write failed; requeueing");
                    let deadline = Instant::now() + self.send_timeout;
                    self.deferred.push(DeferredSend::new(payload, settle, deadline));
                    Step::Next(self.close())
                }
            },
            Some(Command::Destroy) | None => Step::Stop,
        }
    }

    fn expire_deferred(&mut self) {
        let expired = self.deferred.expire(Instant::now());
        if expired > 0 {
            tracing::debug!(expired, "deferred sends timed out");
            if let Some(m) = &self.metrics {
                m.record_send_timeouts(expired as u64);
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.shared.state.send_replace(state);
        if let Some(m) = &self.metrics {
            m.update_connection_state(state.as_gauge());
        }
        if state.is_surfaced() && state != self.surfaced {
            self.surfaced = state;
            tracing::info!(state = %state, "connection state changed");
            self.shared.states.emit(&state);
        }
    }

    async fn shutdown(mut self, phase: Phase) {
        self.shared.destroyed.store(true, Ordering::Release);

        if let Phase::Open(mut conn) = phase {
            if let Ok(Err(e)) = tokio::time::timeout(self.connect_timeout, conn.close()).await {
                tracing::debug!(error = %e, "error closing connection");
            }
        }

        self.deferred.fail_all(Error::Destroyed);
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Send { settle, .. } = command {
                settle(Err(Error::Destroyed));
            }
        }

        if self.surfaced == ConnectionState::Open {
            self.surfaced = ConnectionState::Closed;
            self.shared.states.emit(&ConnectionState::Closed);
        }
        self.set_state(ConnectionState::Destroyed);
        tracing::info!("transport destroyed");
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
