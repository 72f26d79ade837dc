//! Reconnection strategies
//!
//! When a connection drops or an attempt fails, the transport asks its
//! strategy how long to wait before the next attempt. Strategies never give
//! up: the transport keeps trying until it is destroyed.
//!
//! # Built-in Strategies
//!
//! - **DelaySequence**: walk a fixed list of delays, then repeat the last one
//!   (the default: 100ms, 200ms, 1s, 3s)
//! - **ExponentialBackoff**: doubling delays between a floor and a ceiling,
//!   optionally jittered
//! - **FixedDelay**: the same delay every time
//!
//! # Examples
//!
//! ```rust
//! use tether_client::{DelaySequence, ExponentialBackoff, ReconnectionStrategy};
//! use std::time::Duration;
//!
//! let mut seq = DelaySequence::default();
//! assert_eq!(seq.next_delay(0), Duration::from_millis(100));
//! assert_eq!(seq.next_delay(9), Duration::from_secs(3));
//!
//! let backoff = ExponentialBackoff::new(Duration::from_millis(50), Duration::from_secs(10))
//!     .with_jitter();
//! ```

use std::time::Duration;

/// Decides the wait before each reconnection attempt
///
/// `attempt` counts failed attempts since the last successful open, starting
/// at 0. `reset()` is called every time the connection opens.
pub trait ReconnectionStrategy: Send + 'static {
    fn next_delay(&mut self, attempt: u32) -> Duration;

    fn reset(&mut self) {}
}

/// Ordered list of delays, clamped to the last entry
#[derive(Debug, Clone)]
pub struct DelaySequence {
    delays: Vec<Duration>,
}

impl DelaySequence {
    /// An empty list behaves as an immediate retry.
    pub fn new(delays: impl IntoIterator<Item = Duration>) -> Self {
        Self {
            delays: delays.into_iter().collect(),
        }
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

impl Default for DelaySequence {
    fn default() -> Self {
        Self::new([
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_secs(1),
            Duration::from_secs(3),
        ])
    }
}

impl ReconnectionStrategy for DelaySequence {
    fn next_delay(&mut self, attempt: u32) -> Duration {
        let index = (attempt as usize).min(self.delays.len().saturating_sub(1));
        self.delays.get(index).copied().unwrap_or(Duration::ZERO)
    }
}

/// Exponential backoff with optional jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    min_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl ExponentialBackoff {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            jitter: false,
        }
    }

    /// Add up to 25% random extra delay, capped at `max_delay`
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(30)).with_jitter()
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = min.saturating_mul(factor).min(max);

        if self.jitter && delay >= 4 {
            use rand::Rng;
            let extra = rand::thread_rng().gen_range(0..=delay / 4);
            return Duration::from_millis((delay + extra).min(max));
        }
        Duration::from_millis(delay)
    }
}

/// The same delay before every attempt
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&mut self, _attempt: u32) -> Duration {
        self.delay
    }
}
