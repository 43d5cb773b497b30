//! JSON file storage for the daemon.
//!
//! - `JsonFileStore`: one `<key>.json` file per key (holds the notification log)
//! - `JsonRecordStore`: one `<table>.json` file per record kind, holding the
//!   whole collection

use async_trait::async_trait;
use notes_sync_core::store::{KeyValueStore, RecordStore, Result, StoreError, sort_by_order};
use notes_sync_core::SyncRecord;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

fn io_error(e: std::io::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

/// Key/value store writing each value to `<dir>/<key>.json`.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(io_error)?;
        fs::write(self.path_for(key), value).map_err(io_error)
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(e)),
        }
    }
}

/// Local copy of one collection, cached in memory and written through to
/// `<dir>/<table>.json` on every change.
pub struct JsonRecordStore<T> {
    path: PathBuf,
    records: Mutex<Vec<T>>,
}

impl<T> JsonRecordStore<T>
where
    T: SyncRecord + Serialize + DeserializeOwned,
{
    /// Open the store for `T` under `dir`, loading the existing file if any.
    pub async fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(format!("{}.json", T::KIND.table()));

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Serialization(format!("{:?}: {}", path, e)))?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(io_error(e)),
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self, records: &[T]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let contents = serde_json::to_vec_pretty(records)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(io_error)
    }
}

#[async_trait]
impl<T> RecordStore<T> for JsonRecordStore<T>
where
    T: SyncRecord + Serialize + DeserializeOwned,
{
    async fn get(&self, id: &str) -> Result<Option<T>> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| r.id() == id).cloned())
    }

    async fn put(&self, record: T) -> Result<()> {
        let mut records = self.records.lock().await;
        match records.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.save(&records).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|r| r.id() != id);
        if records.len() == before {
            return Ok(());
        }
        self.save(&records).await
    }

    async fn clear(&self) -> Result<()> {
        let mut records = self.records.lock().await;
        records.clear();
        self.save(&records).await
    }

    async fn list_ordered(&self) -> Result<Vec<T>> {
        let mut records = self.records.lock().await.clone();
        sort_by_order(&mut records);
        Ok(records)
    }

    /// Replace the collection with a single file write.
    async fn replace_all(&self, new_records: Vec<T>) -> Result<()> {
        let mut records = self.records.lock().await;
        *records = new_records;
        self.save(&records).await
    }
}
