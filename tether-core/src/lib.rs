//! Wire types and codec for the tether RPC protocol
//!
//! tether carries one-shot calls and server-pushed streams over a single
//! duplex text connection. This crate holds the pieces that do not depend on
//! a transport:
//!
//! - **Types**: the `exec`/`cancelStream` envelopes a client sends and the
//!   `method`/`stream`/`error` envelopes it receives
//! - **Codec**: JSON encoding and decoding of those envelopes
//! - **Schema**: validation of response data
//! - **Error handling**: the error kinds a call can fail with
//! - **Observability**: subscriber and OpenTelemetry setup for applications
//!
//! The `tether-client` crate builds the reconnecting transport and the
//! request-correlation client on top.
//!
//! # Example
//!
//! ```rust
//! use tether_core::{codec, Inbound, Outbound, RequestId};
//!
//! let exec = Outbound::exec(RequestId::new(1), "math", "add", vec![2.into(), 3.into()]);
//! let text = codec::encode_outbound(&exec).unwrap();
//! assert_eq!(text, r#"{"exec":{"id":"1","ns":"math","method":"add","args":[2,3]}}"#);
//!
//! match codec::decode_inbound(r#"{"method":{"id":"1","data":5}}"#).unwrap() {
//!     Inbound::Method { id, data } => {
//!         assert_eq!(id, RequestId::new(1));
//!         assert_eq!(data, 5);
//!     }
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod schema;
pub mod types;

pub use error::{Error, Result};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use schema::{Shape, Validator};
pub use types::{Inbound, Outbound, RequestId, StreamEvent};
