//! Reconnecting RPC client for the tether protocol
//!
//! This crate carries one-shot calls and server-pushed streams over a single
//! duplex connection and keeps them working across disconnects.
//!
//! # Core Features
//!
//! - **Transport**: an actor owning one connection at a time, reconnecting
//!   with a pluggable strategy and queueing sends while disconnected
//! - **Calls**: `exec` a method and await its `method` result, with a
//!   receive timeout and typed or validated variants
//! - **Streams**: shared subscriptions that are re-opened after every
//!   reconnect and cancelled when the last subscriber leaves
//! - **Connectors**: WebSocket via `tokio-tungstenite`, plus an in-memory
//!   pair for tests and embedding
//! - **Observability**: `tracing` events and OpenTelemetry metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tether_client::{ClientBuilder, StreamEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new("ws://localhost:8080/rpc").build()?;
//!
//!     let pong = client.call("health", "ping", ()).await?;
//!     println!("ping: {pong}");
//!
//!     let feed = client.get_stream("chat", "messages", ("general",))?;
//!     let subscription = feed.subscribe(|event| {
//!         if let StreamEvent::Data(message) = event {
//!             println!("message: {message}");
//!         }
//!     });
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!     subscription.unsubscribe();
//!     client.close();
//!     Ok(())
//! }
//! ```

mod client;
mod client_builder;
mod connection_state;
mod connector;
mod deferred;
mod listeners;
pub mod memory;
mod metrics;
mod reconnect;
mod request;
mod stream;
mod transport;

pub use client::{Client, ClientConfig, PendingCallPolicy};
pub use client_builder::ClientBuilder;
pub use connection_state::ConnectionState;
pub use connector::{BoxConnection, Connection, Connector, WsConnector};
pub use listeners::ListenerHandle;
pub use memory::{ChannelConnection, MemoryConnector, MemoryListener};
pub use metrics::ClientMetrics;
pub use reconnect::{DelaySequence, ExponentialBackoff, FixedDelay, ReconnectionStrategy};
pub use stream::{RemoteStream, Subscription};
pub use tether_core::{Error, Result, StreamEvent};
pub use transport::{Transport, TransportConfig};
