//! Request-correlation client
//!
//! A [`Client`] sits on top of one [`Transport`]. It assigns every request
//! an id, remembers what is waiting for that id, and routes each inbound
//! envelope to its waiter:
//!
//! - `method` resolves the pending call with the same id
//! - `error` rejects the pending call with the same id, or is pushed to the
//!   subscribers of the stream with that id
//! - `stream` is pushed to every subscriber of the stream with that id
//!
//! # Reconnects
//!
//! Streams survive disconnects: when the connection opens again, every
//! stream that still has subscribers re-sends its `exec` once, and its
//! subscribers see [`StreamEvent::Loading`]. Pending calls are rejected with
//! [`Error::ConnectionClosed`] when the connection closes, unless the policy
//! is [`PendingCallPolicy::AwaitTimeout`].
//!
//! # Cloning
//!
//! `Client` is a cheap handle; clones share the transport and the tables.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tether_client::{Client, ClientConfig, StreamEvent, Transport, TransportConfig};
//! use serde_json::json;
//!
//! # async fn example() -> tether_core::Result<()> {
//! let transport = Transport::connect("ws://localhost:8080/rpc", TransportConfig::default());
//! let client = Client::new(transport, ClientConfig::default());
//!
//! let sum = client.call("math", "add", (2, 3)).await?;
//! assert_eq!(sum, json!(5));
//!
//! let ticks = client.get_stream("clock", "ticks", ())?;
//! let _subscription = ticks.subscribe(|event| match event {
//!     StreamEvent::Loading => println!("waiting for the first tick"),
//!     StreamEvent::Data(tick) => println!("tick {tick}"),
//!     StreamEvent::Error(err) => eprintln!("stream error {err}"),
//! });
//! # Ok(())
//! # }
//! ```

use crate::connection_state::ConnectionState;
use crate::listeners::ListenerHandle;
use crate::metrics::ClientMetrics;
use crate::request::{IdAllocator, PendingCall, RequestTable, StreamEntry, Subscriber};
use crate::stream::RemoteStream;
use crate::transport::Transport;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tether_core::{
    codec, schema, Error, Inbound, Outbound, RequestId, Result, StreamEvent, Validator,
};
use tokio::sync::oneshot;

/// What happens to pending calls when the connection closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingCallPolicy {
    /// Reject them with [`Error::ConnectionClosed`]
    #[default]
    RejectOnClose,
    /// Keep waiting for a response until the receive timeout
    AwaitTimeout,
}

/// Client settings
///
/// The receive timeout runs from the moment of the call, including any time
/// the request spends waiting for a connection. A call whose deadline passes
/// before its `exec` was written fails with [`Error::SendTimeout`], whichever
/// of the two timeouts is shorter. Only a call that reached the server can
/// fail with [`Error::ReceiveTimeout`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long a call waits for its response, measured from the call
    pub receive_timeout: Duration,
    pub pending_call_policy: PendingCallPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_secs(1),
            pending_call_policy: PendingCallPolicy::RejectOnClose,
        }
    }
}

impl ClientConfig {
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_pending_call_policy(mut self, policy: PendingCallPolicy) -> Self {
        self.pending_call_policy = policy;
        self
    }
}

/// RPC client over a reconnecting transport
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    me: Weak<ClientInner>,
    transport: Transport,
    config: ClientConfig,
    ids: IdAllocator,
    exec_tokens: AtomicU64,
    table: Mutex<RequestTable>,
    closed: AtomicBool,
    listeners: Mutex<Vec<ListenerHandle>>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl Client {
    /// Attach a client to a transport
    pub fn new(transport: Transport, config: ClientConfig) -> Self {
        Self::with_metrics(transport, config, None)
    }

    pub(crate) fn with_metrics(
        transport: Transport,
        config: ClientConfig,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| {
            let on_message = {
                let weak = weak.clone();
                transport.on_message(move |text| {
                    if let Some(inner) = weak.upgrade() {
                        inner.dispatch(text);
                    }
                })
            };
            let on_state = {
                let weak = weak.clone();
                transport.on_state_change(move |state| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_state_change(state);
                    }
                })
            };

            ClientInner {
                me: weak.clone(),
                transport: transport.clone(),
                config,
                ids: IdAllocator::new(),
                exec_tokens: AtomicU64::new(0),
                table: Mutex::new(RequestTable::default()),
                closed: AtomicBool::new(false),
                listeners: Mutex::new(vec![on_message, on_state]),
                metrics,
            }
        });
        Self { inner }
    }

    /// Start configuring a client for a WebSocket URL
    pub fn builder(url: impl Into<String>) -> crate::ClientBuilder {
        crate::ClientBuilder::new(url)
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.transport.state()
    }

    /// Call a method and wait for its result
    ///
    /// `args` becomes the argument list: a tuple or sequence is spread into
    /// it, `()` means no arguments, anything else is a single argument. Wrap
    /// a single sequence argument in a 1-tuple.
    ///
    /// Dropping the returned future abandons the call.
    #[tracing::instrument(skip(self, args), fields(ns = %ns, method = %method))]
    pub async fn call<A: Serialize>(&self, ns: &str, method: &str, args: A) -> Result<Value> {
        let args = codec::to_args(args)?;
        self.inner.call(ns, method, args).await
    }

    /// Call a method and deserialize its result
    ///
    /// A result that does not deserialize into `T` fails with
    /// [`Error::Validation`].
    pub async fn call_as<T, A>(&self, ns: &str, method: &str, args: A) -> Result<T>
    where
        T: DeserializeOwned,
        A: Serialize,
    {
        let value = self.call(ns, method, args).await?;
        schema::parse(value).map_err(|e| self.inner.note_error(e))
    }

    /// Call a method and check its result with `validator`
    pub async fn call_validated<A: Serialize>(
        &self,
        ns: &str,
        method: &str,
        args: A,
        validator: &dyn Validator,
    ) -> Result<Value> {
        let value = self.call(ns, method, args).await?;
        schema::check(validator, value).map_err(|e| self.inner.note_error(e))
    }

    /// Open a stream handle
    ///
    /// Nothing is sent until the first subscriber arrives.
    pub fn get_stream<A: Serialize>(
        &self,
        ns: &str,
        method: &str,
        args: A,
    ) -> Result<RemoteStream> {
        let args = codec::to_args(args)?;
        let id = self.inner.ids.next();
        let exec = codec::encode_outbound(&Outbound::exec(id, ns, method, args))?;

        if !self.inner.is_closed() {
            self.inner
                .table()
                .streams
                .insert(id, StreamEntry::new(exec.clone()));
        }
        tracing::debug!(id = %id, ns = %ns, method = %method, "stream created");

        Ok(RemoteStream::new(Arc::clone(&self.inner), id, exec))
    }

    /// Number of calls waiting for a response
    pub fn pending_calls(&self) -> usize {
        self.inner.table().calls.len()
    }

    /// Number of live stream entries
    pub fn active_streams(&self) -> usize {
        self.inner.table().streams.len()
    }

    /// Shut down for good
    ///
    /// Pending calls fail with [`Error::ConnectionClosed`], streams are
    /// dropped without notifying the server, and the transport is destroyed.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("pending_calls", &self.pending_calls())
            .field("active_streams", &self.active_streams())
            .finish()
    }
}

/// Removes an abandoned call from the table
struct PendingGuard<'a> {
    inner: &'a ClientInner,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.inner.table().take_call(self.id).is_some() {
            tracing::debug!(id = %self.id, "call abandoned");
        }
    }
}

impl ClientInner {
    pub(crate) fn table(&self) -> MutexGuard<'_, RequestTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn call(&self, ns: &str, method: &str, args: Vec<Value>) -> Result<Value> {
        let id = self.ids.next();
        let text = codec::encode_outbound(&Outbound::exec(id, ns, method, args))?;
        let qualified = format!("{ns}.{method}");
        let started = Instant::now();

        let (tx, mut rx) = oneshot::channel();
        self.table().calls.insert(
            id,
            PendingCall {
                tx,
                method: qualified.clone(),
                started,
                written: false,
            },
        );
        let _guard = PendingGuard { inner: self, id };

        let weak = self.me.clone();
        self.transport.send_with(
            text,
            Box::new(move |result| {
                let Some(inner) = weak.upgrade() else { return };
                match result {
                    Ok(()) => inner.mark_written(id),
                    Err(e) => inner.fail_call(id, e),
                }
            }),
        );
        tracing::debug!(id = %id, "call sent");

        let outcome = match tokio::time::timeout(self.config.receive_timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                let expired = self.table().take_call(id);
                if let Some(call) = expired {
                    if call.written {
                        Err(Error::ReceiveTimeout)
                    } else {
                        // never left the deferred queue
                        Err(Error::SendTimeout)
                    }
                } else {
                    // resolved at the deadline
                    rx.try_recv().unwrap_or(Err(Error::ReceiveTimeout))
                }
            }
        };

        self.record_call(id, &qualified, started, &outcome);
        outcome
    }

    fn record_call(&self, id: RequestId, method: &str, started: Instant, outcome: &Result<Value>) {
        let elapsed = started.elapsed();
        let status = match outcome {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        match outcome {
            Ok(_) => tracing::debug!(
                id = %id,
                method = %method,
                duration_ms = elapsed.as_millis() as u64,
                "call completed"
            ),
            Err(e) => tracing::debug!(
                id = %id,
                method = %method,
                duration_ms = elapsed.as_millis() as u64,
                error = %e,
                "call failed"
            ),
        }
        if let Some(m) = &self.metrics {
            m.record_call(method, status, elapsed.as_secs_f64());
            if let Err(e) = outcome {
                m.record_error(e.kind());
            }
        }
    }

    fn note_error(&self, error: Error) -> Error {
        if let Some(m) = &self.metrics {
            m.record_error(error.kind());
        }
        error
    }

    fn mark_written(&self, id: RequestId) {
        if let Some(call) = self.table().calls.get_mut(&id) {
            call.written = true;
        }
    }

    fn fail_call(&self, id: RequestId, error: Error) {
        let call = self.table().take_call(id);
        if let Some(call) = call {
            tracing::debug!(
                id = %id,
                method = %call.method,
                waited_ms = call.started.elapsed().as_millis() as u64,
                error = %error,
                "call send failed"
            );
            call.resolve(Err(error));
        }
    }

    pub(crate) fn dispatch(&self, text: &str) {
        let envelope = match codec::decode_inbound(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, len = text.len(), "dropping undecodable frame");
                if let Some(m) = &self.metrics {
                    m.record_error(e.kind());
                }
                return;
            }
        };

        match envelope {
            Inbound::Method { id, data } => {
                let call = self.table().take_call(id);
                match call {
                    Some(call) => call.resolve(Ok(data)),
                    None => tracing::trace!(id = %id, "result for unknown call"),
                }
            }
            Inbound::Stream { id, data } => {
                if let Some(m) = &self.metrics {
                    m.record_stream_push();
                }
                self.deliver(id, StreamEvent::Data(data));
            }
            Inbound::Error { id: Some(id), data } => {
                let call = self.table().take_call(id);
                match call {
                    Some(call) => call.resolve(Err(Error::Remote(data))),
                    None => self.deliver(id, StreamEvent::Error(data)),
                }
            }
            Inbound::Error { id: None, data } => {
                tracing::warn!(data = %data, "connection-level error from server");
                if let Some(m) = &self.metrics {
                    m.record_error("remote");
                }
            }
        }
    }

    /// Push an event to every subscriber of a stream
    fn deliver(&self, id: RequestId, event: StreamEvent) {
        let subscribers = self.table().subscribers(id);
        match subscribers {
            Some(subscribers) => notify(&subscribers, &event),
            None => tracing::trace!(id = %id, "push for unknown stream"),
        }
    }

    fn on_state_change(&self, state: ConnectionState) {
        match state {
            ConnectionState::Closed => {
                let rejected = {
                    let mut table = self.table();
                    table.mark_streams_undelivered();
                    match self.config.pending_call_policy {
                        PendingCallPolicy::RejectOnClose => table.drain_calls(),
                        PendingCallPolicy::AwaitTimeout => Vec::new(),
                    }
                };
                if !rejected.is_empty() {
                    tracing::info!(count = rejected.len(), "rejecting pending calls on close");
                }
                for call in rejected {
                    call.resolve(Err(Error::ConnectionClosed));
                }
            }
            ConnectionState::Open => {
                let resends = self
                    .table()
                    .claim_resends(|| self.next_exec_token());
                for (id, exec, token, subscribers) in resends {
                    tracing::debug!(id = %id, "re-sending stream exec");
                    self.send_stream_exec(id, exec, token);
                    notify(&subscribers, &StreamEvent::Loading);
                }
            }
            ConnectionState::Connecting | ConnectionState::Destroyed => {}
        }
    }

    /// Start sending a stream's `exec`; the entry must already be marked in flight
    pub(crate) fn send_stream_exec(&self, id: RequestId, exec: String, token: u64) {
        let weak = self.me.clone();
        self.transport.send_with(
            exec,
            Box::new(move |result| {
                if let Some(inner) = weak.upgrade() {
                    inner.finish_stream_exec(id, token, result);
                }
            }),
        );
    }

    fn finish_stream_exec(&self, id: RequestId, token: u64, result: Result<()>) {
        let mut table = self.table();
        if let Some(entry) = table.streams.get_mut(&id) {
            if entry.finish_exec(token, result.is_ok()) {
                if let Err(e) = result {
                    tracing::warn!(
                        id = %id,
                        error = %e,
                        "stream exec not sent; will retry on next open"
                    );
                }
            }
        }
    }

    pub(crate) fn next_exec_token(&self) -> u64 {
        self.exec_tokens.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Send `cancelStream` for a stream whose last subscriber left
    pub(crate) fn send_cancel(&self, id: RequestId) {
        let text = match codec::encode_outbound(&Outbound::cancel_stream(id)) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "could not encode cancelStream");
                return;
            }
        };
        tracing::debug!(id = %id, "stream cancelled");
        self.transport.send_with(
            text,
            Box::new(move |result| {
                if let Err(e) = result {
                    tracing::debug!(id = %id, error = %e, "cancelStream not delivered");
                }
            }),
        );
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let (calls, streams) = {
            let mut table = self.table();
            let calls = table.drain_calls();
            let streams = table.streams.len();
            table.streams.clear();
            (calls, streams)
        };
        let listeners = {
            let mut guard = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        drop(listeners);
        self.transport.destroy();

        tracing::info!(
            pending_calls = calls.len(),
            streams,
            "client closed"
        );
        for call in calls {
            call.resolve(Err(Error::ConnectionClosed));
        }
    }
}

/// Call every subscriber with a copy of `event`, isolating panics
pub(crate) fn notify(subscribers: &[Subscriber], event: &StreamEvent) {
    for subscriber in subscribers {
        let event = event.clone();
        if catch_unwind(AssertUnwindSafe(|| subscriber(event))).is_err() {
            tracing::warn!("stream subscriber panicked; continuing with the remaining subscribers");
        }
    }
}
