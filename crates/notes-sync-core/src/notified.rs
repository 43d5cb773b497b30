//! Durable record of changes already surfaced to the user.
//!
//! Keys are `"<kind>_<id>_<modified_at>"` strings kept as a JSON array in a
//! `KeyValueStore`, so the set survives restarts. The set is bounded and evicts
//! in insertion order.
//!
//! Storage failures never reach the caller: a failed read behaves as "not
//! notified" and a failed write is dropped. Missing a de-dup entry can at worst
//! show one extra notification.

use crate::record::{EntityKind, SyncRecord};
use crate::store::KeyValueStore;
use std::sync::Mutex;
use tracing::warn;

/// Storage key of the notified set.
pub const NOTIFIED_ITEMS_KEY: &str = "notified_items";

/// Default bound on the notified set.
pub const DEFAULT_NOTIFIED_CAPACITY: usize = 100;

/// Composite key for one version of one record.
pub fn notification_key(kind: EntityKind, id: &str, modified_at: u64) -> String {
    format!("{}_{}_{}", kind.as_str(), id, modified_at)
}

/// Bounded, insertion-ordered set of notified record versions.
pub struct NotificationLog<S> {
    store: S,
    capacity: usize,
    /// Serializes read-modify-write cycles on the stored array.
    write_lock: Mutex<()>,
}

impl<S: KeyValueStore> NotificationLog<S> {
    pub fn new(store: S, capacity: usize) -> Self {
        Self {
            store,
            capacity,
            write_lock: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether this exact record version was already notified.
    pub fn was_notified(&self, kind: EntityKind, id: &str, modified_at: u64) -> bool {
        let key = notification_key(kind, id, modified_at);
        self.load().iter().any(|entry| *entry == key)
    }

    /// Remember a record version, evicting the oldest entries past capacity.
    pub fn mark_notified(&self, kind: EntityKind, id: &str, modified_at: u64) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.load();
        self.insert(&mut entries, notification_key(kind, id, modified_at));
        self.save(&entries);
    }

    /// Mark every given record as notified in one write.
    ///
    /// Called once after the initial load so that records which already existed
    /// never produce "new content" notifications.
    pub fn seed_as_notified<'a, T, I>(&self, records: I)
    where
        T: SyncRecord,
        I: IntoIterator<Item = &'a T>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.load();
        for record in records {
            self.insert(
                &mut entries,
                notification_key(T::KIND, record.id(), record.modified_at()),
            );
        }
        self.save(&entries);
    }

    /// Stored keys, oldest first.
    pub fn entries(&self) -> Vec<String> {
        self.load()
    }

    fn insert(&self, entries: &mut Vec<String>, key: String) {
        if !entries.contains(&key) {
            entries.push(key);
        }
        if entries.len() > self.capacity {
            let excess = entries.len() - self.capacity;
            entries.drain(..excess);
        }
    }

    fn load(&self) -> Vec<String> {
        let raw = match self.store.get(NOTIFIED_ITEMS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Failed to read notified items: {}", e);
                return Vec::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Ignoring unreadable notified items: {}", e);
                Vec::new()
            }
        }
    }

    fn save(&self, entries: &[String]) {
        let raw = match serde_json::to_string(entries) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize notified items: {}", e);
                return;
            }
        };

        if let Err(e) = self.store.set(NOTIFIED_ITEMS_KEY, &raw) {
            warn!("Failed to persist notified items: {}", e);
        }
    }
}
