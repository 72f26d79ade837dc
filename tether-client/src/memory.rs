//! In-memory connections
//!
//! [`memory()`] returns a connected pair: a [`MemoryConnector`] to hand to a
//! transport and a [`MemoryListener`] that accepts the server end of every
//! connection the transport opens. Useful for tests and for embedding a
//! server in the same process.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tether_client::{memory, Transport, TransportConfig};
//!
//! # async fn example() {
//! let (connector, mut listener) = memory::memory();
//! let transport = Transport::with_connector(connector, TransportConfig::default());
//!
//! let mut server = listener.accept().await.unwrap();
//! transport.send("hello").await.unwrap();
//! assert_eq!(server.recv().await.as_deref(), Some("hello"));
//! # }
//! ```

use crate::connector::{BoxConnection, Connector};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::future::{self, BoxFuture};
use futures::{Sink, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tether_core::{Error, Result};

/// Create a connector and the listener receiving its connections
pub fn memory() -> (MemoryConnector, MemoryListener) {
    let (accept_tx, accept_rx) = mpsc::unbounded();
    let switches = Arc::new(Switches {
        online: AtomicBool::new(true),
        stalled: AtomicBool::new(false),
    });
    (
        MemoryConnector {
            accept_tx,
            switches: Arc::clone(&switches),
        },
        MemoryListener {
            accept_rx,
            switches,
        },
    )
}

struct Switches {
    online: AtomicBool,
    stalled: AtomicBool,
}

/// Client side of [`memory()`]
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: UnboundedSender<ChannelConnection>,
    switches: Arc<Switches>,
}

impl Connector for MemoryConnector {
    fn connect(&self) -> BoxFuture<'static, Result<BoxConnection>> {
        if self.switches.stalled.load(Ordering::SeqCst) {
            return Box::pin(future::pending());
        }
        if !self.switches.online.load(Ordering::SeqCst) {
            return Box::pin(future::ready(Err(Error::Connect(
                "connection refused".to_string(),
            ))));
        }

        let (client, server) = ChannelConnection::pair();
        let result = match self.accept_tx.unbounded_send(server) {
            Ok(()) => {
                let connection: BoxConnection = Box::pin(client);
                Ok(connection)
            }
            Err(_) => Err(Error::Connect("listener dropped".to_string())),
        };
        Box::pin(future::ready(result))
    }
}

/// Server side of [`memory()`]
pub struct MemoryListener {
    accept_rx: UnboundedReceiver<ChannelConnection>,
    switches: Arc<Switches>,
}

impl MemoryListener {
    /// Wait for the next connection; `None` once every connector is dropped
    pub async fn accept(&mut self) -> Option<ChannelConnection> {
        self.accept_rx.next().await
    }

    /// While offline, connect attempts fail immediately
    pub fn set_online(&self, online: bool) {
        self.switches.online.store(online, Ordering::SeqCst);
    }

    /// While stalled, connect attempts never complete
    pub fn set_stalled(&self, stalled: bool) {
        self.switches.stalled.store(stalled, Ordering::SeqCst);
    }
}

/// One end of an in-memory connection
///
/// Dropping either end closes the connection for the other.
pub struct ChannelConnection {
    tx: UnboundedSender<String>,
    rx: UnboundedReceiver<String>,
}

impl ChannelConnection {
    /// Two connected ends
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded();
        let (b_tx, a_rx) = mpsc::unbounded();
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }

    /// Queue a payload for the other end
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.tx
            .unbounded_send(text.into())
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Next payload from the other end; `None` once it is gone
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.next().await
    }

    /// A payload that already arrived, if any
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Close the sending half; the other end sees its stream end
    pub fn close(&self) {
        self.tx.close_channel();
    }
}

impl Stream for ChannelConnection {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx).map(|item| item.map(Ok))
    }
}

impl Sink<String> for ChannelConnection {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.tx.poll_ready(cx).map_err(|_| Error::ConnectionClosed)
    }

    fn start_send(self: Pin<&mut Self>, item: String) -> Result<()> {
        self.tx
            .unbounded_send(item)
            .map_err(|_| Error::ConnectionClosed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.tx.close_channel();
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::SinkExt;

    #[tokio::test]
    async fn test_pair_is_duplex() {
        let (mut a, mut b) = ChannelConnection::pair();
        a.send("ping".to_string()).await.unwrap();
        assert_eq!(b.recv().await.as_deref(), Some("ping"));

        b.send_text("pong").unwrap();
        assert_eq!(a.next().await.unwrap().unwrap(), "pong");
    }

    #[test]
    fn test_try_recv_takes_only_what_arrived() {
        let (a, mut b) = ChannelConnection::pair();
        assert_eq!(b.try_recv(), None);
        a.send_text("one").unwrap();
        a.send_text("two").unwrap();
        assert_eq!(b.try_recv().as_deref(), Some("one"));
        assert_eq!(b.try_recv().as_deref(), Some("two"));
        drop(a);
        assert_eq!(b.try_recv(), None);
    }

    #[tokio::test]
    async fn test_drop_ends_the_other_side() {
        let (a, mut b) = ChannelConnection::pair();
        drop(a);
        assert_eq!(b.recv().await, None);
        assert!(b.send_text("x").is_err());
    }

    #[tokio::test]
    async fn test_connector_hands_server_end_to_listener() {
        let (connector, mut listener) = memory();
        let mut client = connector.connect().await.ok().unwrap();
        let mut server = listener.accept().await.unwrap();

        client.send("hi".to_string()).await.unwrap();
        assert_eq!(server.recv().await.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_offline_refuses() {
        let (connector, listener) = memory();
        listener.set_online(false);
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, Error::Connect(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_never_completes() {
        let (connector, listener) = memory();
        listener.set_stalled(true);
        let attempt =
            tokio::time::timeout(std::time::Duration::from_secs(5), connector.connect()).await;
        assert!(attempt.is_err());
    }
}
