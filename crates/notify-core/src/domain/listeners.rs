//! Callback registry with explicit, idempotent unregistration.
//!
//! Observers register a callback and get back a [`ListenerId`].  Removing
//! the same id twice is harmless, and a callback removed while a
//! notification is in flight is simply not called on the next one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by [`ListenerRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A set of callbacks that all receive the same value.
pub struct ListenerRegistry<T> {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<ListenerId, Callback<T>>>,
}

impl<T> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    pub fn add<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(id, Arc::new(callback));
        id
    }

    /// Removes a listener.  Returns `false` if it was already gone.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Calls every registered listener with `value`.
    ///
    /// The set is snapshotted first so callbacks may add or remove
    /// listeners without deadlocking.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self.lock().values().cloned().collect();
        for callback in snapshot {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ListenerId, Callback<T>>> {
        // A panicking callback runs outside the lock, so poisoning can only
        // come from a panic inside HashMap itself; the map is still usable.
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ListenerRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
