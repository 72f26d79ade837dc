//! Error types for tether
//!
//! A one-shot call resolves with data or fails with exactly one [`Error`].
//! The kinds split into three groups:
//!
//! - **Per-request**: `Remote`, `Validation`, `ReceiveTimeout`, `SendTimeout`,
//!   `ConnectionClosed`. They reject a single call (or reach a single stream's
//!   subscribers) and never tear down the client.
//! - **Dispatch**: `Decode`. An inbound frame that cannot be parsed cannot be
//!   attributed to any request, so it is only logged.
//! - **Local**: `Serialization`, `Connect`, `Destroyed`. Encoding failures,
//!   connection attempts that failed (recovered by reconnecting), and use after
//!   shutdown.

use thiserror::Error;

/// Result type for tether operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for tether operations
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// No terminal response arrived within the receive timeout
    #[error("no response within the receive timeout")]
    ReceiveTimeout,

    /// A deferred send was not flushed within the send timeout
    #[error("send timed out while disconnected")]
    SendTimeout,

    /// The connection closed while the call was outstanding
    #[error("connection closed")]
    ConnectionClosed,

    /// The server answered with an `error` envelope for this request
    ///
    /// The payload is passed through verbatim.
    #[error("remote error: {0}")]
    Remote(serde_json::Value),

    /// An inbound frame is not a valid envelope
    #[error("decode error: {0}")]
    Decode(String),

    /// The response data does not have the expected shape
    #[error("validation error: {0}")]
    Validation(String),

    /// An outbound value could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Establishing or using the physical connection failed
    #[error("connection error: {0}")]
    Connect(String),

    /// The transport or client has been shut down
    #[error("transport destroyed")]
    Destroyed,
}

impl Error {
    /// Short stable label, used for metric attributes and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ReceiveTimeout => "receive_timeout",
            Error::SendTimeout => "send_timeout",
            Error::ConnectionClosed => "connection_closed",
            Error::Remote(_) => "remote",
            Error::Decode(_) => "decode",
            Error::Validation(_) => "validation",
            Error::Serialization(_) => "serialization",
            Error::Connect(_) => "connect",
            Error::Destroyed => "destroyed",
        }
    }

    /// True for the timeout kinds
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ReceiveTimeout | Error::SendTimeout)
    }

    /// Payload of a remote error, if this is one
    pub fn remote_data(&self) -> Option<&serde_json::Value> {
        match self {
            Error::Remote(data) => Some(data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remote_error_display_includes_payload() {
        let err = Error::Remote(json!({"JsonError": "expected u8"}));
        assert_eq!(
            err.to_string(),
            r#"remote error: {"JsonError":"expected u8"}"#
        );
        assert_eq!(err.remote_data(), Some(&json!({"JsonError": "expected u8"})));
    }

    #[test]
    fn test_kinds_are_distinct() {
        let all = [
            Error::ReceiveTimeout,
            Error::SendTimeout,
            Error::ConnectionClosed,
            Error::Remote(json!(null)),
            Error::Decode(String::new()),
            Error::Validation(String::new()),
            Error::Serialization(String::new()),
            Error::Connect(String::new()),
            Error::Destroyed,
        ];
        let mut kinds: Vec<_> = all.iter().map(Error::kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), all.len());
    }

    #[test]
    fn test_timeouts() {
        assert!(Error::ReceiveTimeout.is_timeout());
        assert!(Error::SendTimeout.is_timeout());
        assert!(!Error::ConnectionClosed.is_timeout());
    }
}
