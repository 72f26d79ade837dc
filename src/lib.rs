//! tether - reconnecting RPC over a single duplex connection
//!
//! This is the convenience crate that re-exports the tether sub-crates.
//!
//! # Architecture
//!
//! - **tether-core**: envelopes, codec, errors, schema validation, observability
//! - **tether-client**: reconnecting transport, request-correlation client, streams
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tether::{ClientBuilder, StreamEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new("ws://localhost:8080/rpc")
//!         .with_default_observability()
//!         .build()?;
//!
//!     let total: u64 = client.call_as("cart", "total", ("user-1",)).await?;
//!     println!("total: {total}");
//!
//!     let orders = client.get_stream("orders", "updates", ())?;
//!     let _subscription = orders.subscribe(|event| match event {
//!         StreamEvent::Loading => println!("(re)connecting order feed"),
//!         StreamEvent::Data(order) => println!("order: {order}"),
//!         StreamEvent::Error(err) => eprintln!("order feed error: {err}"),
//!     });
//!
//!     tokio::signal::ctrl_c().await?;
//!     client.close();
//!     tether::core::shutdown_observability();
//!     Ok(())
//! }
//! ```

pub use tether_client as client;
pub use tether_core as core;

pub use tether_client::{
    Client, ClientBuilder, ClientConfig, ConnectionState, PendingCallPolicy, RemoteStream,
    Subscription, Transport, TransportConfig,
};
pub use tether_core::{Error, Result, StreamEvent};
