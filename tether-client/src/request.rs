//! Request bookkeeping
//!
//! Every call and stream gets an id from the client's [`IdAllocator`] and
//! an entry in the [`RequestTable`] until it is finished:
//!
//! - a **pending call** lives until its response, error, timeout, send
//!   failure, abandonment or (policy permitting) a connection close
//! - a **stream** lives until its last subscriber leaves or the client closes
//!
//! An id is in at most one of the two maps at a time, and is never handed
//! out twice.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tether_core::{RequestId, Result, StreamEvent};
use tokio::sync::oneshot;

/// Strictly increasing id source; the first id is 1
#[derive(Debug)]
pub(crate) struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub(crate) fn next(&self) -> RequestId {
        RequestId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// A one-shot call waiting for its terminal response
pub(crate) struct PendingCall {
    pub(crate) tx: oneshot::Sender<Result<Value>>,
    /// `ns.method`, for logs and metrics
    pub(crate) method: String,
    pub(crate) started: Instant,
    /// Set once the transport has written the `exec`
    pub(crate) written: bool,
}

impl PendingCall {
    pub(crate) fn resolve(self, result: Result<Value>) {
        // the caller may have gone away already
        let _ = self.tx.send(result);
    }
}

pub(crate) type Subscriber = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// A stream and its subscribers
pub(crate) struct StreamEntry {
    /// Encoded `exec` envelope, re-sent on reconnect
    pub(crate) exec: String,
    pub(crate) subscribers: BTreeMap<u64, Subscriber>,
    next_key: u64,
    /// The `exec` is queued or being written
    pub(crate) in_flight: bool,
    /// The `exec` was written on the current connection
    pub(crate) delivered: bool,
    /// Identifies the latest `exec` send, so a stale completion is ignored
    pub(crate) send_token: u64,
}

impl StreamEntry {
    pub(crate) fn new(exec: String) -> Self {
        Self {
            exec,
            subscribers: BTreeMap::new(),
            next_key: 0,
            in_flight: false,
            delivered: false,
            send_token: 0,
        }
    }

    pub(crate) fn add(&mut self, subscriber: Subscriber) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        self.subscribers.insert(key, subscriber);
        key
    }

    pub(crate) fn snapshot(&self) -> Vec<Subscriber> {
        self.subscribers.values().cloned().collect()
    }

    /// Whether an `exec` must be sent for this entry on the current connection
    pub(crate) fn needs_exec(&self) -> bool {
        !self.subscribers.is_empty() && !self.in_flight && !self.delivered
    }

    pub(crate) fn begin_exec(&mut self, token: u64) {
        self.in_flight = true;
        self.delivered = false;
        self.send_token = token;
    }

    /// Record the outcome of the send identified by `token`
    ///
    /// Returns false for a stale token.
    pub(crate) fn finish_exec(&mut self, token: u64, written: bool) -> bool {
        if token != self.send_token {
            return false;
        }
        self.in_flight = false;
        self.delivered = written;
        true
    }
}

/// Pending calls and streams of one client
#[derive(Default)]
pub(crate) struct RequestTable {
    pub(crate) calls: HashMap<RequestId, PendingCall>,
    pub(crate) streams: HashMap<RequestId, StreamEntry>,
}

impl RequestTable {
    pub(crate) fn take_call(&mut self, id: RequestId) -> Option<PendingCall> {
        self.calls.remove(&id)
    }

    pub(crate) fn drain_calls(&mut self) -> Vec<PendingCall> {
        self.calls.drain().map(|(_, call)| call).collect()
    }

    /// Subscribers of a stream, cloned so they can be called without the lock
    pub(crate) fn subscribers(&self, id: RequestId) -> Option<Vec<Subscriber>> {
        self.streams.get(&id).map(StreamEntry::snapshot)
    }

    /// Forget the current connection: every stream needs a fresh `exec`
    pub(crate) fn mark_streams_undelivered(&mut self) {
        for entry in self.streams.values_mut() {
            entry.delivered = false;
        }
    }

    /// Streams that need an `exec` on a newly opened connection
    ///
    /// Each returned stream is marked in flight under a fresh token from
    /// `token_for`.
    pub(crate) fn claim_resends(
        &mut self,
        mut token_for: impl FnMut() -> u64,
    ) -> Vec<(RequestId, String, u64, Vec<Subscriber>)> {
        let mut ids: Vec<RequestId> = self
            .streams
            .iter()
            .filter(|(_, entry)| entry.needs_exec())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = self.streams.get_mut(&id) {
                let token = token_for();
                entry.begin_exec(token);
                claimed.push((id, entry.exec.clone(), token, entry.snapshot()));
            }
        }
        claimed
    }
}
