//! notes-sync-core: sync and notification reconciliation for a notes / to-do app.
//!
//! This crate provides the core functionality for:
//! - Record types (`Note`, `TodoList`) scoped to an owner
//! - Snapshot change detection and local-write echo suppression
//! - Durable notification de-duplication
//! - Sync status tracking with multiple observers
//! - `SyncSession`, which drives polling and realtime updates for one owner
//! - Remote, storage, notifier and connectivity traits with in-memory versions

pub mod change;
pub mod config;
pub mod connectivity;
pub mod local_changes;
pub mod notified;
pub mod notifier;
pub mod record;
pub mod remote;
pub mod session;
pub mod status;
pub mod store;

pub use change::{Change, detect_changes};
pub use config::SyncConfig;
pub use connectivity::{AlwaysOnline, Connectivity, ConnectivityFlag};
pub use local_changes::LocalChangeTracker;
pub use notified::NotificationLog;
pub use notifier::{LogNotifier, Notification, Notifier, RecordingNotifier};
pub use record::{EntityKind, Note, OwnerId, OwnerIdError, SyncRecord, TodoItem, TodoList};
pub use remote::{ChangeFeed, ChangeSignal, InMemoryRemote, RemoteDataService, RemoteError};
pub use session::{SessionCallbacks, SessionDeps, SyncSession};
pub use status::{StatusSubscription, SyncStatus, SyncStatusTracker};
pub use store::{InMemoryRecordStore, KeyValueStore, MemoryStore, RecordStore, StoreError};
