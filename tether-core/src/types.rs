//! Wire types for the tether protocol
//!
//! Every frame on the connection is a single JSON object with exactly one key
//! naming its kind. Clients send [`Outbound`] envelopes and receive
//! [`Inbound`] envelopes:
//!
//! ```text
//! {"exec": {"id": "7", "ns": "chat", "method": "send", "args": ["hi"]}}
//! {"cancelStream": {"id": "7"}}
//!
//! {"method": {"id": "7", "data": 42}}
//! {"stream": {"id": "7", "data": "x"}}
//! {"error":  {"id": "7", "data": {"kind": "NotFound"}}}
//! ```
//!
//! # Request IDs
//!
//! Ids are unsigned 64-bit integers but travel as decimal strings, so peers
//! whose JSON numbers are doubles do not lose precision above 2^53.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Identifier correlating a request with its responses
///
/// Allocated by the client, strictly increasing and never reused for the
/// lifetime of a client.
///
/// # Examples
///
/// ```rust
/// use tether_core::RequestId;
///
/// let id = RequestId::new(u64::MAX);
/// let json = serde_json::to_string(&id).unwrap();
/// assert_eq!(json, "\"18446744073709551615\"");
///
/// let back: RequestId = serde_json::from_str(&json).unwrap();
/// assert_eq!(back, id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RequestIdVisitor)
    }
}

struct RequestIdVisitor;

impl<'de> Visitor<'de> for RequestIdVisitor {
    type Value = RequestId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative 64-bit integer as a decimal string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<RequestId, E> {
        v.parse::<u64>()
            .map(RequestId)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }

    // Bare integers are tolerated on input; they are never produced.
    fn visit_u64<E: de::Error>(self, v: u64) -> Result<RequestId, E> {
        Ok(RequestId(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<RequestId, E> {
        u64::try_from(v)
            .map(RequestId)
            .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
    }
}

/// Envelope sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outbound {
    /// Issue a call or open a stream
    Exec {
        id: RequestId,
        ns: String,
        method: String,
        args: Vec<serde_json::Value>,
    },
    /// Terminate a previously opened stream
    CancelStream { id: RequestId },
}

impl Outbound {
    pub fn exec(
        id: RequestId,
        ns: impl Into<String>,
        method: impl Into<String>,
        args: Vec<serde_json::Value>,
    ) -> Self {
        Outbound::Exec {
            id,
            ns: ns.into(),
            method: method.into(),
            args,
        }
    }

    pub fn cancel_stream(id: RequestId) -> Self {
        Outbound::CancelStream { id }
    }

    pub fn id(&self) -> RequestId {
        match self {
            Outbound::Exec { id, .. } | Outbound::CancelStream { id } => *id,
        }
    }
}

/// Envelope received by the client
///
/// Anything that is not exactly one of these three shapes fails to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Inbound {
    /// Terminal response to a one-shot call
    Method {
        id: RequestId,
        #[serde(default)]
        data: serde_json::Value,
    },
    /// One pushed value for an open stream
    Stream {
        id: RequestId,
        #[serde(default)]
        data: serde_json::Value,
    },
    /// Failure scoped to a request, or to the connection when `id` is absent
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<RequestId>,
        #[serde(default)]
        data: serde_json::Value,
    },
}

impl Inbound {
    pub fn method(id: RequestId, data: serde_json::Value) -> Self {
        Inbound::Method { id, data }
    }

    pub fn stream(id: RequestId, data: serde_json::Value) -> Self {
        Inbound::Stream { id, data }
    }

    pub fn error(id: impl Into<Option<RequestId>>, data: serde_json::Value) -> Self {
        Inbound::Error {
            id: id.into(),
            data,
        }
    }

    /// The request this envelope is scoped to, if any
    pub fn id(&self) -> Option<RequestId> {
        match self {
            Inbound::Method { id, .. } | Inbound::Stream { id, .. } => Some(*id),
            Inbound::Error { id, .. } => *id,
        }
    }
}

/// Notification delivered to stream subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<T = serde_json::Value> {
    /// The stream request is (re)issued and no value has arrived yet
    Loading,
    /// A pushed value
    Data(T),
    /// An error pushed for this stream; the stream stays open
    Error(serde_json::Value),
}

impl<T> StreamEvent<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, StreamEvent::Loading)
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            StreamEvent::Data(value) => Some(value),
            _ => None,
        }
    }
}
