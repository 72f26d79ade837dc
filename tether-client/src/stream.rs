//! Server-pushed streams
//!
//! [`Client::get_stream`](crate::Client::get_stream) returns a
//! [`RemoteStream`]. Subscribing is what opens it on the server: the first
//! subscriber sends the `exec`, later ones share it, and when the last
//! [`Subscription`] goes away a `cancelStream` is sent.
//!
//! Every subscriber first sees [`StreamEvent::Loading`], then a `Data` per
//! pushed value. `Loading` is seen again each time the stream is re-opened
//! after a reconnect. Errors pushed for the stream arrive as `Error` events
//! and do not end it.

use crate::client::{notify, ClientInner};
use crate::request::{StreamEntry, Subscriber};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tether_core::{RequestId, StreamEvent};

/// Handle to one stream request
///
/// The id is fixed for the handle's lifetime; subscribing again after the
/// stream went empty re-opens it under the same id.
pub struct RemoteStream {
    inner: Arc<ClientInner>,
    id: RequestId,
    exec: String,
}

impl RemoteStream {
    pub(crate) fn new(inner: Arc<ClientInner>, id: RequestId, exec: String) -> Self {
        Self { inner, id, exec }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .table()
            .streams
            .get(&self.id)
            .map_or(0, |entry| entry.subscribers.len())
    }

    /// Add a subscriber
    ///
    /// `callback` receives `Loading` before this returns. Callbacks run on
    /// the transport task and must not block.
    pub fn subscribe(
        &self,
        callback: impl Fn(StreamEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let callback: Subscriber = Arc::new(callback);
        notify(std::slice::from_ref(&callback), &StreamEvent::Loading);

        if self.inner.is_closed() {
            tracing::warn!(id = %self.id, "subscribe on a closed client");
            return Subscription {
                inner: Arc::clone(&self.inner),
                id: self.id,
                key: None,
            };
        }

        let (key, token) = {
            let mut table = self.inner.table();
            let entry = table
                .streams
                .entry(self.id)
                .or_insert_with(|| StreamEntry::new(self.exec.clone()));
            let key = entry.add(callback);
            let token = if entry.needs_exec() {
                let token = self.inner.next_exec_token();
                entry.begin_exec(token);
                Some(token)
            } else {
                None
            };
            (key, token)
        };

        if let Some(token) = token {
            tracing::debug!(id = %self.id, "opening stream");
            self.inner.send_stream_exec(self.id, self.exec.clone(), token);
        }

        Subscription {
            inner: Arc::clone(&self.inner),
            id: self.id,
            key: Some(key),
        }
    }

    /// Add a subscriber receiving values deserialized into `T`
    ///
    /// A value that does not deserialize is delivered as an `Error` event
    /// carrying the deserialization message.
    pub fn subscribe_as<T>(
        &self,
        callback: impl Fn(StreamEvent<T>) + Send + Sync + 'static,
    ) -> Subscription
    where
        T: DeserializeOwned + 'static,
    {
        self.subscribe(move |event| {
            let typed = match event {
                StreamEvent::Loading => StreamEvent::Loading,
                StreamEvent::Error(err) => StreamEvent::Error(err),
                StreamEvent::Data(value) => match serde_json::from_value::<T>(value) {
                    Ok(data) => StreamEvent::Data(data),
                    Err(e) => StreamEvent::Error(serde_json::Value::String(format!(
                        "validation error: {e}"
                    ))),
                },
            };
            callback(typed);
        })
    }
}

impl Drop for RemoteStream {
    fn drop(&mut self) {
        let mut table = self.inner.table();
        let unused = table
            .streams
            .get(&self.id)
            .is_some_and(|entry| entry.subscribers.is_empty());
        if unused {
            table.streams.remove(&self.id);
        }
    }
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStream")
            .field("id", &self.id)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A registered stream subscriber
///
/// Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    inner: Arc<ClientInner>,
    id: RequestId,
    key: Option<u64>,
}

impl Subscription {
    pub fn stream_id(&self) -> RequestId {
        self.id
    }

    /// Remove this subscriber; the last one out cancels the stream
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };

        let cancel = {
            let mut table = self.inner.table();
            match table.streams.get_mut(&self.id) {
                Some(entry) => {
                    entry.subscribers.remove(&key);
                    if entry.subscribers.is_empty() {
                        table.streams.remove(&self.id);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if cancel {
            self.inner.send_cancel(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("stream_id", &self.id)
            .field("active", &self.key.is_some())
            .finish()
    }
}
