//! Codec for tether envelopes
//!
//! Thin wrappers over `serde_json` that map failures onto the crate's error
//! kinds: encoding problems become [`Error::Serialization`], anything that
//! cannot be read as an envelope becomes [`Error::Decode`].
//!
//! The client side uses [`encode_outbound`] and [`decode_inbound`]. The
//! mirrored pair exists for servers and test peers.
//!
//! # Examples
//!
//! ```rust
//! use tether_core::{codec, Inbound, Outbound, RequestId};
//! use serde_json::json;
//!
//! let exec = Outbound::exec(RequestId::new(1), "ns", "m", vec![json!(1)]);
//! let text = codec::encode_outbound(&exec).unwrap();
//! assert_eq!(text, r#"{"exec":{"id":"1","ns":"ns","method":"m","args":[1]}}"#);
//!
//! let reply = codec::decode_inbound(r#"{"method":{"id":"1","data":42}}"#).unwrap();
//! assert_eq!(reply, Inbound::method(RequestId::new(1), json!(42)));
//! ```

use crate::error::{Error, Result};
use crate::types::{Inbound, Outbound};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode any serializable value as JSON text
pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode JSON text, reporting failures as [`Error::Decode`]
pub fn decode_as<T: DeserializeOwned>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| Error::Decode(e.to_string()))
}

/// Encode a client-to-server envelope
pub fn encode_outbound(envelope: &Outbound) -> Result<String> {
    encode(envelope)
}

/// Decode a server-to-client envelope
///
/// Unknown tags, extra top-level keys and non-object frames are rejected.
pub fn decode_inbound(data: &str) -> Result<Inbound> {
    decode_as(data)
}

/// Encode a server-to-client envelope
pub fn encode_inbound(envelope: &Inbound) -> Result<String> {
    encode(envelope)
}

/// Decode a client-to-server envelope
pub fn decode_outbound(data: &str) -> Result<Outbound> {
    decode_as(data)
}

/// Serialize call arguments into the `args` array of an `exec` envelope
///
/// A tuple or array becomes the argument list; `()` becomes no arguments; any
/// other value becomes a single argument.
pub fn to_args<A: Serialize>(args: A) -> Result<Vec<serde_json::Value>> {
    match serde_json::to_value(args).map_err(|e| Error::Serialization(e.to_string()))? {
        serde_json::Value::Array(items) => Ok(items),
        serde_json::Value::Null => Ok(Vec::new()),
        other => Ok(vec![other]),
    }
}
