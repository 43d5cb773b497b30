//! Local storage abstractions.
//!
//! Two traits:
//! - `KeyValueStore`: small durable string values (the notification log lives here)
//! - `RecordStore`: id-indexed record storage for the offline copy of a collection
//!
//! Implementations:
//! - `MemoryStore` / `InMemoryRecordStore` - For testing
//! - `JsonFileStore` / `JsonRecordStore` (in notes-sync-daemon) - JSON files on disk

use crate::record::SyncRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable string key/value storage, read and written synchronously.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

/// In-memory key/value store for testing
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
        Ok(())
    }
}

/// Id-indexed storage for one collection of records.
///
/// The sync session never writes here itself: whoever receives the session's
/// collection callbacks persists them (see `SessionCallbacks`).
#[async_trait]
pub trait RecordStore<T: SyncRecord>: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<T>>;

    /// Insert or overwrite the record with the same id.
    async fn put(&self, record: T) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    /// All records ordered by their `order` field, ties broken by id.
    async fn list_ordered(&self) -> Result<Vec<T>>;

    /// Replace the whole collection.
    async fn replace_all(&self, records: Vec<T>) -> Result<()> {
        self.clear().await?;
        for record in records {
            self.put(record).await?;
        }
        Ok(())
    }
}

/// Sort records by `(order, id)`.
pub fn sort_by_order<T: SyncRecord>(records: &mut [T]) {
    records.sort_by(|a, b| a.order().cmp(&b.order()).then_with(|| a.id().cmp(b.id())));
}

/// In-memory record store for testing
pub struct InMemoryRecordStore<T> {
    records: RwLock<HashMap<String, T>>,
}

impl<T> InMemoryRecordStore<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> Default for InMemoryRecordStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: SyncRecord> RecordStore<T> for InMemoryRecordStore<T> {
    async fn get(&self, id: &str) -> Result<Option<T>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(id).cloned())
    }

    async fn put(&self, record: T) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(record.id().to_string(), record);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.remove(id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }

    async fn list_ordered(&self) -> Result<Vec<T>> {
        let mut records: Vec<T> = self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        sort_by_order(&mut records);
        Ok(records)
    }
}

#[async_trait]
impl<T: SyncRecord, S: RecordStore<T> + ?Sized> RecordStore<T> for Arc<S> {
    async fn get(&self, id: &str) -> Result<Option<T>> {
        (**self).get(id).await
    }

    async fn put(&self, record: T) -> Result<()> {
        (**self).put(record).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        (**self).delete(id).await
    }

    async fn clear(&self) -> Result<()> {
        (**self).clear().await
    }

    async fn list_ordered(&self) -> Result<Vec<T>> {
        (**self).list_ordered().await
    }

    async fn replace_all(&self, records: Vec<T>) -> Result<()> {
        (**self).replace_all(records).await
    }
}
