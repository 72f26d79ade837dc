//! Client reconnection integration tests
//!
//! The server end is dropped to simulate a lost connection; the transport
//! reconnects after [`common::RECONNECT_DELAY`].

mod common;

use common::{accept, init_tracing, memory_client, settle, transport_config, Recorder};
use common::RECONNECT_DELAY;
use futures::future::{self, BoxFuture};
use futures::{Sink, Stream};
use serde_json::{json, Value};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tether_client::memory::{memory, MemoryConnector};
use tether_client::{BoxConnection, Client, ClientConfig, ConnectionState, Connector, Error};
use tether_client::{PendingCallPolicy, StreamEvent, Transport};

#[tokio::test(start_paused = true)]
async fn test_stream_is_reopened_once_per_reconnect() {
    let (client, mut listener) = memory_client(ClientConfig::default());
    let mut peer = accept(&mut listener, &client).await;

    let stream = client.get_stream("chat", "messages", ("general",)).unwrap();
    let (a, b) = (Recorder::new(), Recorder::new());
    let _sub_a = stream.subscribe(a.callback());
    let _sub_b = stream.subscribe(b.callback());
    let (id, ns, method, args) = peer.next_exec().await;

    for _ in 0..2 {
        drop(peer);
        peer = accept(&mut listener, &client).await;

        let (again, again_ns, again_method, again_args) = peer.next_exec().await;
        assert_eq!((again, &again_ns, &again_method, &again_args), (id, &ns, &method, &args));
        settle().await;
        assert!(peer.drain().is_empty(), "exec must be re-sent exactly once");
    }

    assert_eq!(a.loading_count(), 3);
    assert_eq!(b.loading_count(), 3);

    peer.push(id, json!("after reconnect"));
    settle().await;
    assert_eq!(a.data(), vec![json!("after reconnect")]);
    assert_eq!(b.data(), vec![json!("after reconnect")]);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_sees_loading_before_new_data() {
    let (client, mut listener) = memory_client(ClientConfig::default());
    let mut peer = accept(&mut listener, &client).await;

    let stream = client.get_stream("feed", "items", ()).unwrap();
    let recorder = Recorder::new();
    let _sub = stream.subscribe(recorder.callback());
    let (id, _, _, _) = peer.next_exec().await;
    peer.push(id, json!(1));
    settle().await;

    drop(peer);
    let mut peer = accept(&mut listener, &client).await;
    peer.next_exec().await;
    peer.push(id, json!(2));
    settle().await;

    assert_eq!(
        recorder.events(),
        vec![
            StreamEvent::Loading,
            StreamEvent::Data(json!(1)),
            StreamEvent::Loading,
            StreamEvent::Data(json!(2)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_stream_is_not_reopened() {
    let (client, mut listener) = memory_client(ClientConfig::default());
    let mut peer = accept(&mut listener, &client).await;

    let stream = client.get_stream("feed", "items", ()).unwrap();
    let sub = stream.subscribe(|_| {});
    peer.next_exec().await;
    sub.unsubscribe();
    peer.next_envelope().await;

    drop(peer);
    let mut peer = accept(&mut listener, &client).await;
    settle().await;
    assert!(peer.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_resolved_calls_are_not_resent() {
    let (client, mut listener) = memory_client(ClientConfig::default());
    let mut peer = accept(&mut listener, &client).await;

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.call("x", "y", ()).await })
    };
    let (id, _, _, _) = peer.next_exec().await;
    peer.respond(id, json!("done"));
    assert_eq!(call.await.unwrap().unwrap(), json!("done"));

    drop(peer);
    let mut peer = accept(&mut listener, &client).await;
    settle().await;
    assert!(peer.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reject_on_close_fails_pending_calls() {
    let (client, mut listener) = memory_client(ClientConfig::default());
    let mut peer = accept(&mut listener, &client).await;

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.call("x", "y", ()).await })
    };
    peer.next_exec().await;
    drop(peer);

    assert!(matches!(call.await.unwrap(), Err(Error::ConnectionClosed)));
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_await_timeout_keeps_calls_across_reconnect() {
    let config = ClientConfig::default()
        .with_pending_call_policy(PendingCallPolicy::AwaitTimeout)
        .with_receive_timeout(Duration::from_secs(2));
    let (client, mut listener) = memory_client(config);
    let mut peer = accept(&mut listener, &client).await;

    let answered = {
        let client = client.clone();
        tokio::spawn(async move { client.call("x", "answered", ()).await })
    };
    let (answered_id, _, _, _) = peer.next_exec().await;
    let unanswered = {
        let client = client.clone();
        tokio::spawn(async move { client.call("x", "unanswered", ()).await })
    };
    peer.next_exec().await;

    drop(peer);
    let peer = accept(&mut listener, &client).await;
    assert_eq!(client.pending_calls(), 2);

    peer.respond(answered_id, json!(true));
    assert_eq!(answered.await.unwrap().unwrap(), json!(true));
    assert!(matches!(unanswered.await.unwrap(), Err(Error::ReceiveTimeout)));
}

#[tokio::test(start_paused = true)]
async fn test_state_changes_are_surfaced_once_each() {
    let (client, mut listener) = memory_client(ClientConfig::default());
    let states = Arc::new(Mutex::new(Vec::new()));
    let _handle = {
        let states = Arc::clone(&states);
        client
            .transport()
            .on_state_change(move |state| states.lock().unwrap().push(state))
    };

    let peer = accept(&mut listener, &client).await;

    // several refused attempts while closed surface a single Closed
    listener.set_online(false);
    drop(peer);
    tokio::time::sleep(RECONNECT_DELAY * 5).await;
    assert_eq!(client.state(), ConnectionState::Closed);

    listener.set_online(true);
    let _peer = accept(&mut listener, &client).await;

    assert_eq!(
        *states.lock().unwrap(),
        vec![
            ConnectionState::Open,
            ConnectionState::Closed,
            ConnectionState::Open
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_first_attempts_surface_nothing() {
    let (client, mut listener) = memory_client(ClientConfig::default());
    listener.set_online(false);

    let states = Arc::new(Mutex::new(Vec::new()));
    let _handle = {
        let states = Arc::clone(&states);
        client
            .transport()
            .on_state_change(move |state| states.lock().unwrap().push(state))
    };

    tokio::time::sleep(RECONNECT_DELAY * 4).await;
    assert!(states.lock().unwrap().is_empty());
    assert!(!client.transport().is_open());

    listener.set_online(true);
    let _peer = accept(&mut listener, &client).await;
    assert_eq!(*states.lock().unwrap(), vec![ConnectionState::Open]);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_while_disconnected_opens_on_connect() {
    let (client, mut listener) = memory_client(ClientConfig::default());
    listener.set_online(false);

    let stream = client.get_stream("feed", "items", Value::Null).unwrap();
    let recorder = Recorder::new();
    let _sub = stream.subscribe(recorder.callback());

    tokio::time::sleep(RECONNECT_DELAY * 2).await;
    listener.set_online(true);
    let mut peer = accept(&mut listener, &client).await;

    let (id, _, _, _) = peer.next_exec().await;
    assert_eq!(id, stream.id());
    settle().await;
    assert!(peer.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stream_exec_lost_to_send_timeout_is_retried() {
    let (client, mut listener) = memory_client(ClientConfig::default());
    listener.set_online(false);

    let stream = client.get_stream("feed", "items", ()).unwrap();
    let recorder = Recorder::new();
    let _sub = stream.subscribe(recorder.callback());

    // past the send timeout, so the queued exec is dropped
    tokio::time::sleep(Duration::from_millis(1500)).await;
    listener.set_online(true);
    let mut peer = accept(&mut listener, &client).await;

    let (id, _, _, _) = peer.next_exec().await;
    assert_eq!(id, stream.id());
    settle().await;
    assert!(peer.drain().is_empty());
    assert_eq!(recorder.loading_count(), 2);
}

/// Connection that accepts one write and then fails; it never receives
struct OneWriteConnection {
    written: usize,
}

impl Stream for OneWriteConnection {
    type Item = tether_client::Result<String>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Pending
    }
}

impl Sink<String> for OneWriteConnection {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        if self.written >= 1 {
            Poll::Ready(Err(Error::ConnectionClosed))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn start_send(mut self: Pin<&mut Self>, _item: String) -> Result<(), Error> {
        self.written += 1;
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Refuses the first attempt, breaks the second mid-flush, then connects
struct FlakyConnector {
    attempts: AtomicUsize,
    live: MemoryConnector,
}

impl Connector for FlakyConnector {
    fn connect(&self) -> BoxFuture<'static, tether_client::Result<BoxConnection>> {
        match self.attempts.fetch_add(1, Ordering::SeqCst) {
            0 => Box::pin(future::ready(Err(Error::Connect("refused".to_string())))),
            1 => {
                let conn: BoxConnection = Box::pin(OneWriteConnection { written: 0 });
                Box::pin(future::ready(Ok(conn)))
            }
            _ => self.live.connect(),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_streams_survive_connection_lost_during_flush() {
    init_tracing();
    let (live, mut listener) = memory();
    let connector = FlakyConnector {
        attempts: AtomicUsize::new(0),
        live,
    };
    let transport = Transport::with_connector(connector, transport_config());
    let client = Client::new(transport, ClientConfig::default());

    let a = client.get_stream("feed", "a", ()).unwrap();
    let b = client.get_stream("feed", "b", ()).unwrap();
    let _sub_a = a.subscribe(|_| {});
    let _sub_b = b.subscribe(|_| {});

    let mut peer = accept(&mut listener, &client).await;
    let (first, _, first_method, _) = peer.next_exec().await;
    let (second, _, second_method, _) = peer.next_exec().await;
    assert_eq!((first, first_method.as_str()), (a.id(), "a"));
    assert_eq!((second, second_method.as_str()), (b.id(), "b"));
    settle().await;
    assert!(peer.drain().is_empty(), "each exec is written once");
}
