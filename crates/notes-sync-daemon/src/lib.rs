//! notes-sync-daemon library: Exposes the daemon's components for testing.
//!
//! This is a thin layer over the native collaborators of a `SyncSession`:
//! REST remote, realtime feed, JSON file stores and configuration.

pub mod config;
pub mod file_store;
pub mod http_remote;
pub mod persist;
pub mod realtime;

// Re-export key types for convenience
pub use config::DaemonConfig;
pub use file_store::{JsonFileStore, JsonRecordStore};
pub use http_remote::HttpRemote;
pub use persist::persisting_callbacks;
pub use realtime::RealtimeClient;
