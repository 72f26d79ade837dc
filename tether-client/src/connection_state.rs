//! Connection state
//!
//! The transport actor owns the state; everything else observes it.
//!
//! # State Transitions
//!
//! ```text
//! Connecting → Open → Closed → Connecting → ...
//!      ↓                ↑
//!      └──── Closed ────┘           any → Destroyed
//! ```
//!
//! A connect attempt that fails or times out goes straight to `Closed`, where
//! the reconnection strategy decides how long to wait before the next
//! `Connecting`. Only `destroy()` leaves the cycle.

use std::fmt;

/// Connection state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// A connect attempt is in progress
    Connecting,
    /// Connected; sends are written immediately
    Open,
    /// Disconnected, waiting before the next attempt
    Closed,
    /// Shut down for good
    Destroyed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }

    pub fn is_destroyed(self) -> bool {
        self == ConnectionState::Destroyed
    }

    /// Whether listeners hear about entering this state
    ///
    /// Only `Open` and `Closed` are surfaced; `Connecting` is internal and
    /// `Destroyed` is reported as a final `Closed`.
    pub(crate) fn is_surfaced(self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Closed)
    }

    /// Numeric encoding used by the state gauge
    pub(crate) fn as_gauge(self) -> i64 {
        match self {
            ConnectionState::Closed => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Open => 2,
            ConnectionState::Destroyed => -1,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}
