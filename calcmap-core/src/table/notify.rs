//! Change notification.
//!
//! Two kinds of listeners see value changes: an optional callback on a
//! single entry, and any number of table-wide subscribers. Both receive
//! `(key, old, new)`; `old` is `None` when the entry had no value before.
//!
//! Callbacks run synchronously inside the mutating call, after the table
//! lock is released. A callback may read or write the table, but nothing
//! stops it from looping through its own writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Callback fired with `(key, old, new)` when a cached value changes.
pub type ChangeCallback<K, V> = Arc<dyn Fn(&K, Option<&V>, &V) + Send + Sync>;

/// Unique identifier for a table-wide subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Table-wide subscriber list.
pub(crate) struct Subscribers<K, V> {
    entries: RwLock<Vec<(SubscriberId, ChangeCallback<K, V>)>>,
}

impl<K, V> Subscribers<K, V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, callback: ChangeCallback<K, V>) -> SubscriberId {
        let id = SubscriberId::new();
        self.entries.write().push((id, callback));
        id
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(sub, _)| *sub != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Copy the callbacks out so none run under the list lock.
    fn snapshot(&self) -> Vec<ChangeCallback<K, V>> {
        self.entries
            .read()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }
}

/// A value change waiting to be announced.
pub(crate) struct Notification<K, V> {
    pub key: K,
    pub old: Option<V>,
    pub new: V,
    /// The entry's own callback, captured while the lock was held.
    pub node_callback: Option<ChangeCallback<K, V>>,
}

impl<K, V> Notification<K, V> {
    /// Fire the entry callback, then every table subscriber.
    pub fn dispatch(self, subscribers: &Subscribers<K, V>) {
        if let Some(callback) = &self.node_callback {
            callback(&self.key, self.old.as_ref(), &self.new);
        }
        for callback in subscribers.snapshot() {
            callback(&self.key, self.old.as_ref(), &self.new);
        }
    }
}
