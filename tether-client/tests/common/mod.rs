//! Common test utilities for tether-client integration tests
//!
//! Most tests run the client over the in-memory connector and play the
//! server by hand through [`Peer`]. [`MockWsServer`] covers the real
//! WebSocket path.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_client::memory::{memory, ChannelConnection, MemoryListener};
use tether_client::{Client, ClientConfig, FixedDelay, StreamEvent, Transport, TransportConfig};
use tether_core::{codec, Inbound, Outbound, RequestId};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Delay between reconnect attempts in tests
pub const RECONNECT_DELAY: Duration = Duration::from_millis(50);

/// Transport settings used by the memory helpers
pub fn transport_config() -> TransportConfig {
    TransportConfig::default().with_strategy(FixedDelay::new(RECONNECT_DELAY))
}

/// Route client logs to the test output; set `RUST_LOG` to see them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Client over an in-memory connector, plus the listener for its connections
pub fn memory_client(config: ClientConfig) -> (Client, MemoryListener) {
    init_tracing();
    let (connector, listener) = memory();
    let transport = Transport::with_connector(connector, transport_config());
    (Client::new(transport, config), listener)
}

/// Accept the next connection and wait until the client sees it open
pub async fn accept(listener: &mut MemoryListener, client: &Client) -> Peer {
    let conn = listener.accept().await.expect("connector dropped");
    client.transport().opened().await.expect("transport destroyed");
    Peer { conn }
}

/// Hand-driven server end of one connection
pub struct Peer {
    pub conn: ChannelConnection,
}

impl Peer {
    /// Next raw payload the client wrote
    pub async fn next_text(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.conn.recv())
            .await
            .expect("no frame from client")
            .expect("client hung up")
    }

    /// Next envelope the client wrote
    pub async fn next_envelope(&mut self) -> Outbound {
        let text = self.next_text().await;
        codec::decode_outbound(&text).expect("client wrote an invalid envelope")
    }

    /// Next `exec` envelope, returned as (id, ns, method, args)
    pub async fn next_exec(&mut self) -> (RequestId, String, String, Vec<Value>) {
        match self.next_envelope().await {
            Outbound::Exec { id, ns, method, args } => (id, ns, method, args),
            other => panic!("expected exec, got {other:?}"),
        }
    }

    /// Everything the client wrote so far without waiting
    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Some(text) = self.conn.try_recv() {
            out.push(codec::decode_outbound(&text).expect("client wrote an invalid envelope"));
        }
        out
    }

    pub fn send(&self, envelope: Inbound) {
        let text = codec::encode_inbound(&envelope).expect("encode");
        self.conn.send_text(text).expect("client hung up");
    }

    pub fn send_raw(&self, text: &str) {
        self.conn.send_text(text).expect("client hung up");
    }

    pub fn respond(&self, id: RequestId, data: Value) {
        self.send(Inbound::method(id, data));
    }

    pub fn push(&self, id: RequestId, data: Value) {
        self.send(Inbound::stream(id, data));
    }

    pub fn fail(&self, id: RequestId, data: Value) {
        self.send(Inbound::error(id, data));
    }
}

/// Records every event a subscriber sees
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<StreamEvent>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> impl Fn(StreamEvent) + Send + Sync + 'static {
        let events = Arc::clone(&self.events);
        move |event| events.lock().unwrap().push(event)
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn data(&self) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                StreamEvent::Data(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn loading_count(&self) -> usize {
        self.events().iter().filter(|event| event.is_loading()).count()
    }
}

/// Let spawned tasks run until they are idle
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

/// Mock WebSocket server for client testing
///
/// Forwards every text frame it receives to the test and answers with
/// whatever the handler returns.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    message_rx: mpsc::Receiver<String>,
}

impl MockWsServer {
    /// Server answering each `exec` with its own args
    pub async fn echo() -> Self {
        Self::with_handler(|text| {
            match codec::decode_outbound(&text).ok()? {
                Outbound::Exec { id, args, .. } => {
                    codec::encode_inbound(&Inbound::method(id, Value::Array(args))).ok()
                }
                Outbound::CancelStream { .. } => None,
            }
        })
        .await
    }

    /// Start a mock server with a custom frame handler
    pub async fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(String) -> Option<String> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (msg_tx, message_rx) = mpsc::channel::<String>(100);
        let handler = Arc::new(handler);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let msg_tx = msg_tx.clone();
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            let Ok(ws) = accept_async(stream).await else { return };
                            let (mut write, mut read) = ws.split();
                            while let Some(Ok(msg)) = read.next().await {
                                if let Message::Text(text) = msg {
                                    let _ = msg_tx.send(text.clone()).await;
                                    if let Some(reply) = (*handler)(text) {
                                        if write.send(Message::Text(reply)).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                        });
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            message_rx,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Next frame the server received, within five seconds
    pub async fn wait_for_message(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.message_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Stop accepting new connections
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}
