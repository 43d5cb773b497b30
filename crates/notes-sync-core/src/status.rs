//! Sync status tracking.
//!
//! Provides `SyncStatus` (is sync working, when did it last succeed) and
//! `SyncStatusTracker`, which fans every status update out to any number of
//! observers. Wrap the tracker in `Arc` to subscribe.

use crate::record::now_millis;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

/// Snapshot of the sync status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Whether the last sync attempt succeeded.
    pub active: bool,
    /// When a sync last succeeded, in milliseconds since Unix epoch.
    pub last_successful_sync: Option<u64>,
}

type Observer = Arc<dyn Fn(bool) + Send + Sync>;

/// Observer handle that unsubscribes automatically when dropped.
///
/// Hold this value to keep receiving updates, drop it to stop.
pub struct StatusSubscription {
    tracker: Weak<SyncStatusTracker>,
    id: usize,
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.unsubscribe(self.id);
        }
    }
}

/// Process-wide sync status with observer fan-out.
///
/// Every `set_active` call notifies all observers synchronously with the new
/// flag, including repeated `true` → `true` updates.
#[derive(Default)]
pub struct SyncStatusTracker {
    status: RwLock<SyncStatus>,
    observers: RwLock<Vec<(usize, Observer)>>,
    next_id: AtomicUsize,
    /// Slot used by `register_observer`; replaced on each registration.
    primary: Mutex<Option<StatusSubscription>>,
}

impl SyncStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_active(&self) -> bool {
        self.status().active
    }

    /// Record the outcome of a sync attempt. Success also refreshes
    /// `last_successful_sync`.
    pub fn set_active(&self, active: bool) {
        self.record(active);
        self.emit(active);
    }

    /// Update the status without notifying observers.
    pub(crate) fn record(&self, active: bool) {
        let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
        status.active = active;
        if active {
            status.last_successful_sync = Some(now_millis());
        }
    }

    /// Subscribe to status updates. Returns a handle that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        observer: impl Fn(bool) + Send + Sync + 'static,
    ) -> StatusSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(observer)));
        StatusSubscription {
            tracker: Arc::downgrade(self),
            id,
        }
    }

    /// Install the single "primary" observer, replacing any previous one.
    ///
    /// Kept for callers that expect one callback slot; observers added with
    /// `subscribe` are unaffected.
    pub fn register_observer(self: &Arc<Self>, observer: impl Fn(bool) + Send + Sync + 'static) {
        let subscription = self.subscribe(observer);
        let previous = self
            .primary
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(subscription);
        drop(previous);
    }

    /// Remove the primary observer, if any.
    pub fn unregister_observer(&self) {
        let previous = self
            .primary
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drop(previous);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn unsubscribe(&self, id: usize) {
        // `emit` releases the read lock before calling observers, so this
        // cannot wait on itself. The removed observer is dropped after the
        // lock is released.
        let removed = {
            let mut observers = self.observers.write().unwrap_or_else(|e| e.into_inner());
            observers
                .iter()
                .position(|(i, _)| *i == id)
                .map(|pos| observers.remove(pos))
        };
        drop(removed);
    }

    pub(crate) fn emit(&self, active: bool) {
        // Clone the observer list so an observer may subscribe or unsubscribe.
        let observers: Vec<_> = self
            .observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in observers {
            observer(active);
        }
    }
}
