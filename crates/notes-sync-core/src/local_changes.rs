//! Short-lived markers for records this client just wrote.
//!
//! When a write made here comes back through polling or the realtime feed, the
//! marker lets the session recognize it as our own echo and stay quiet instead of
//! notifying the user about their own edit. Markers expire after a TTL that must
//! exceed one polling interval plus the realtime debounce.

use crate::record::EntityKind;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Default marker lifetime.
pub const DEFAULT_LOCAL_WRITE_TTL: Duration = Duration::from_secs(15);

/// Tracks `(kind, id)` pairs recently written by this client.
///
/// Expiry is lazy: `mark_local` sweeps stale markers and `is_local` removes an
/// expired marker it finds. Nothing runs in the background.
pub struct LocalChangeTracker {
    ttl: Duration,
    markers: Mutex<HashMap<(EntityKind, String), Instant>>,
}

impl LocalChangeTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            markers: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record a local write. Re-marking refreshes the timestamp.
    pub fn mark_local(&self, kind: EntityKind, id: &str) {
        let now = Instant::now();
        let mut markers = self.markers.lock().unwrap_or_else(|e| e.into_inner());
        markers.insert((kind, id.to_string()), now);
        markers.retain(|_, written_at| now.duration_since(*written_at) <= self.ttl);
    }

    /// Whether `(kind, id)` was written locally within the TTL.
    pub fn is_local(&self, kind: EntityKind, id: &str) -> bool {
        let key = (kind, id.to_string());
        let mut markers = self.markers.lock().unwrap_or_else(|e| e.into_inner());
        match markers.get(&key) {
            Some(written_at) if written_at.elapsed() <= self.ttl => true,
            Some(_) => {
                markers.remove(&key);
                false
            }
            None => false,
        }
    }

    /// Number of markers currently held (expired ones included until swept).
    pub fn len(&self) -> usize {
        self.markers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LocalChangeTracker {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_WRITE_TTL)
    }
}
