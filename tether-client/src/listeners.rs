//! Listener registry
//!
//! Transports publish inbound payloads and state changes to registered
//! callbacks. Each registration returns a [`ListenerHandle`]; dropping the
//! handle or calling [`ListenerHandle::remove`] deregisters the callback.
//!
//! Callbacks run synchronously, in registration order, on whichever task
//! emits. A panicking callback is logged and skipped; the others still run.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type ListenerFn<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Registry of callbacks for one event type
pub(crate) struct Listeners<T: ?Sized> {
    next_key: AtomicU64,
    entries: Mutex<BTreeMap<u64, ListenerFn<T>>>,
}

impl<T: ?Sized + 'static> Listeners<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_key: AtomicU64::new(0),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Add a callback; the handle holds only a weak reference to the registry
    pub(crate) fn add(
        self: &Arc<Self>,
        listener: impl Fn(&T) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(key, Arc::new(listener));

        let registry: Weak<Self> = Arc::downgrade(self);
        ListenerHandle::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.lock().remove(&key);
            }
        })
    }

    /// Invoke every callback registered at the time of the call
    pub(crate) fn emit(&self, event: &T) {
        let snapshot: Vec<ListenerFn<T>> = self.lock().values().cloned().collect();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!("listener panicked; continuing with the remaining listeners");
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, ListenerFn<T>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Deregisters a listener when dropped
#[must_use = "dropping a ListenerHandle deregisters the listener"]
pub struct ListenerHandle {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerHandle {
    pub(crate) fn new(remove: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// Deregister now
    pub fn remove(mut self) {
        self.run();
    }

    /// Keep the listener registered for the lifetime of the registry
    pub fn detach(mut self) {
        self.remove = None;
    }

    fn run(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.run();
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_all_in_order() {
        let registry: Arc<Listeners<str>> = Arc::new(Listeners::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = {
            let seen = Arc::clone(&seen);
            registry.add(move |msg: &str| seen.lock().unwrap().push(format!("a:{msg}")))
        };
        let b = {
            let seen = Arc::clone(&seen);
            registry.add(move |msg: &str| seen.lock().unwrap().push(format!("b:{msg}")))
        };

        registry.emit("x");
        assert_eq!(*seen.lock().unwrap(), vec!["a:x", "b:x"]);
        drop((a, b));
    }

    #[test]
    fn test_drop_handle_deregisters() {
        let registry: Arc<Listeners<u32>> = Arc::new(Listeners::new());
        let count = Arc::new(AtomicUsize::new(0));

        let handle = {
            let count = Arc::clone(&count);
            registry.add(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        registry.emit(&1);
        drop(handle);
        registry.emit(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_detach_keeps_listener() {
        let registry: Arc<Listeners<u32>> = Arc::new(Listeners::new());
        registry.add(|_| {}).detach();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let registry: Arc<Listeners<u32>> = Arc::new(Listeners::new());
        let count = Arc::new(AtomicUsize::new(0));

        let _bad = registry.add(|_| panic!("listener failure"));
        let _good = {
            let count = Arc::clone(&count);
            registry.add(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        registry.emit(&7);
        registry.emit(&8);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listener_may_deregister_itself_during_emit() {
        let registry: Arc<Listeners<u32>> = Arc::new(Listeners::new());
        let slot: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));

        let handle = {
            let slot = Arc::clone(&slot);
            registry.add(move |_| {
                slot.lock().unwrap().take();
            })
        };
        *slot.lock().unwrap() = Some(handle);

        registry.emit(&1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_handle_outliving_registry_is_harmless() {
        let registry: Arc<Listeners<u32>> = Arc::new(Listeners::new());
        let handle = registry.add(|_| {});
        drop(registry);
        handle.remove();
    }
}
