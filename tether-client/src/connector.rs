//! Physical connections
//!
//! A [`Connection`] is a duplex text channel: a stream of inbound payloads
//! and a sink for outbound ones. A [`Connector`] produces a fresh connection
//! for every attempt the transport makes.
//!
//! [`WsConnector`] dials a WebSocket URL with `tokio-tungstenite`. Text frames
//! are passed through, binary frames are accepted when they hold UTF-8, and
//! control frames are left to the library.

use futures::future::BoxFuture;
use futures::{Sink, Stream};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tether_core::{Error, Result};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Duplex text connection
///
/// The stream ends when the peer goes away; an `Err` item means the
/// connection failed. Either way the transport drops it and reconnects.
pub trait Connection: Stream<Item = Result<String>> + Sink<String, Error = Error> + Send {}

impl<T> Connection for T where
    T: Stream<Item = Result<String>> + Sink<String, Error = Error> + Send
{
}

pub type BoxConnection = Pin<Box<dyn Connection>>;

/// Opens connections on demand
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'static, Result<BoxConnection>>;
}

impl Connector for Box<dyn Connector> {
    fn connect(&self) -> BoxFuture<'static, Result<BoxConnection>> {
        (**self).connect()
    }
}

impl<C: Connector> Connector for std::sync::Arc<C> {
    fn connect(&self) -> BoxFuture<'static, Result<BoxConnection>> {
        (**self).connect()
    }
}

/// Connector for `ws://` and `wss://` URLs
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> BoxFuture<'static, Result<BoxConnection>> {
        let url = self.url.clone();
        Box::pin(async move {
            tracing::debug!(url = %url, "dialing websocket");
            let (ws, _response) = connect_async(url.as_str())
                .await
                .map_err(|e| Error::Connect(e.to_string()))?;
            let connection: BoxConnection = Box::pin(WsConnection { ws });
            Ok(connection)
        })
    }
}

struct WsConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Stream for WsConnection {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let message = match ready!(Pin::new(&mut self.ws).poll_next(cx)) {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Poll::Ready(Some(Err(Error::Connect(e.to_string())))),
                None => return Poll::Ready(None),
            };
            match message {
                Message::Text(text) => return Poll::Ready(Some(Ok(text))),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return Poll::Ready(Some(Ok(text))),
                    Err(_) => tracing::warn!("dropping binary frame that is not UTF-8"),
                },
                Message::Close(frame) => {
                    tracing::debug!(frame = ?frame, "websocket close frame received");
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}

impl Sink<String> for WsConnection {
    type Error = Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.ws)
            .poll_ready(cx)
            .map_err(|e| Error::Connect(e.to_string()))
    }

    fn start_send(mut self: Pin<&mut Self>, item: String) -> Result<()> {
        Pin::new(&mut self.ws)
            .start_send(Message::Text(item))
            .map_err(|e| Error::Connect(e.to_string()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.ws)
            .poll_flush(cx)
            .map_err(|e| Error::Connect(e.to_string()))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.ws)
            .poll_close(cx)
            .map_err(|e| Error::Connect(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ws_connector_reports_refused_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = WsConnector::new(format!("ws://{addr}"));
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, Error::Connect(_)));
    }

    #[test]
    fn test_ws_connector_keeps_url() {
        assert_eq!(WsConnector::new("ws://h:1/rpc").url(), "ws://h:1/rpc");
    }
}
