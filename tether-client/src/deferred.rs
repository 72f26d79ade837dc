//! Deferred-send queue
//!
//! Payloads sent while the connection is not open wait here, each with its
//! own deadline. When the connection opens, expired entries are failed with
//! [`Error::SendTimeout`] and the rest are flushed in FIFO order.
//!
//! The queue is owned by the transport actor and never shared.

use std::collections::VecDeque;
use tether_core::{Error, Result};
use tokio::time::Instant;

/// Completion callback for a send
pub(crate) type Settle = Box<dyn FnOnce(Result<()>) + Send>;

/// A queued payload awaiting an open connection
pub(crate) struct DeferredSend {
    pub(crate) payload: String,
    pub(crate) settle: Settle,
    pub(crate) deadline: Instant,
}

impl DeferredSend {
    pub(crate) fn new(payload: String, settle: Settle, deadline: Instant) -> Self {
        Self {
            payload,
            settle,
            deadline,
        }
    }
}

#[derive(Default)]
pub(crate) struct DeferredQueue {
    items: VecDeque<DeferredSend>,
}

impl DeferredQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, item: DeferredSend) {
        self.items.push_back(item);
    }

    /// Put an item back at the head, ahead of everything queued after it
    pub(crate) fn push_front(&mut self, item: DeferredSend) {
        self.items.push_front(item);
    }

    pub(crate) fn pop_front(&mut self) -> Option<DeferredSend> {
        self.items.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Earliest deadline in the queue
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.items.iter().map(|item| item.deadline).min()
    }

    /// Fail every entry whose deadline is at or before `now`
    ///
    /// Returns the number of entries failed.
    pub(crate) fn expire(&mut self, now: Instant) -> usize {
        let mut expired = Vec::new();
        let mut kept = VecDeque::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            if item.deadline <= now {
                expired.push(item);
            } else {
                kept.push_back(item);
            }
        }
        self.items = kept;

        let count = expired.len();
        for item in expired {
            (item.settle)(Err(Error::SendTimeout));
        }
        count
    }

    /// Fail every entry with `err`
    pub(crate) fn fail_all(&mut self, err: Error) {
        for item in self.items.drain(..) {
            (item.settle)(Err(err.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<(String, std::result::Result<(), String>)>>>;

    fn item(log: &Log, payload: &str, deadline: Instant) -> DeferredSend {
        let log = Arc::clone(log);
        let name = payload.to_string();
        DeferredSend::new(
            payload.to_string(),
            Box::new(move |r| {
                log.lock()
                    .unwrap()
                    .push((name, r.map_err(|e| e.kind().to_string())))
            }),
            deadline,
        )
    }

    #[test]
    fn test_fifo_order() {
        let log = Log::default();
        let now = Instant::now();
        let mut queue = DeferredQueue::new();
        queue.push(item(&log, "a", now));
        queue.push(item(&log, "b", now));
        queue.push_front(item(&log, "z", now));

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_front())
            .map(|i| i.payload)
            .collect();
        assert_eq!(order, vec!["z", "a", "b"]);
    }

    #[test]
    fn test_expire_fails_only_due_entries() {
        let log = Log::default();
        let now = Instant::now();
        let mut queue = DeferredQueue::new();
        queue.push(item(&log, "late", now + Duration::from_millis(10)));
        queue.push(item(&log, "due", now));

        assert_eq!(queue.next_deadline(), Some(now));
        assert_eq!(queue.expire(now), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec![("due".to_string(), Err("send_timeout".to_string()))]
        );
        assert_eq!(queue.next_deadline(), Some(now + Duration::from_millis(10)));
    }

    #[test]
    fn test_fail_all() {
        let log = Log::default();
        let now = Instant::now();
        let mut queue = DeferredQueue::new();
        queue.push(item(&log, "a", now));
        queue.push(item(&log, "b", now));

        queue.fail_all(Error::Destroyed);
        assert!(queue.is_empty());
        assert_eq!(queue.next_deadline(), None);
        assert_eq!(log.lock().unwrap().len(), 2);
        assert!(log
            .lock()
            .unwrap()
            .iter()
            .all(|(_, r)| r.as_ref().err().map(String::as_str) == Some("destroyed")));
    }
}
