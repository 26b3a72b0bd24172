use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::is_safe_name;
use crate::error::StoreError;

/// Keyed JSON document store grouped in named collections.
///
/// `update` replaces the whole document, there is no field merge. The store
/// does not make a read followed by an update atomic; callers that need
/// that hold a [`super::KeyedLocks`] guard around the sequence.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store a new record, fails with `AlreadyExists` if the key is taken
    async fn create(&self, collection: &str, key: &str, value: &Value) -> Result<(), StoreError>;

    /// Read a record, fails with `NotFound` if absent
    async fn read(&self, collection: &str, key: &str) -> Result<Value, StoreError>;

    /// Replace a record's content, fails with `NotFound` if absent
    async fn update(&self, collection: &str, key: &str, value: &Value) -> Result<(), StoreError>;

    /// Remove a record, fails with `NotFound` if absent
    async fn delete(&self, collection: &str, key: &str) -> Result<(), StoreError>;

    /// Keys present in a collection, in no particular order
    async fn list(&self, collection: &str) -> Result<Vec<String>, StoreError>;
}

fn not_found(collection: &str, key: &str) -> StoreError {
    StoreError::NotFound { collection: collection.to_string(), key: key.to_string() }
}

fn already_exists(collection: &str, key: &str) -> StoreError {
    StoreError::AlreadyExists { collection: collection.to_string(), key: key.to_string() }
}

/// File system backed record store.
///
/// ```text
/// {base_dir}/
/// └── {collection}/
///     ├── {key}.json
///     └── ...
/// ```
pub struct FileRecordStore {
    base_dir: PathBuf,
}

impl FileRecordStore {
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await?;
        debug!("FileRecordStore initialized at {:?}", base_dir);
        Ok(Self { base_dir })
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf, StoreError> {
        if !is_safe_name(collection) {
            return Err(StoreError::InvalidKey(collection.to_string()));
        }
        Ok(self.base_dir.join(collection))
    }

    fn record_path(&self, collection: &str, key: &str) -> Result<PathBuf, StoreError> {
        if !is_safe_name(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.collection_dir(collection)?.join(format!("{key}.json")))
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn create(&self, collection: &str, key: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.record_path(collection, key)?;
        fs::create_dir_all(self.collection_dir(collection)?).await?;
        let content = serde_json::to_vec(value)?;

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(already_exists(collection, key));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&content).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read(&self, collection: &str, key: &str) -> Result<Value, StoreError> {
        let path = self.record_path(collection, key)?;
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found(collection, key)),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&content)?)
    }

    async fn update(&self, collection: &str, key: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.record_path(collection, key)?;
        let content = serde_json::to_vec(value)?;

        // Truncating open without create: a missing record stays missing
        let mut file = match OpenOptions::new().write(true).truncate(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found(collection, key)),
            Err(e) => return Err(e.into()),
        };
        file.write_all(&content).await?;
        file.flush().await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), StoreError> {
        let path = self.record_path(collection, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(collection, key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.collection_dir(collection)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                warn!("Skipping non UTF-8 file name in {:?}", dir);
                continue;
            };
            if let Some(key) = name.strip_suffix(".json") {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }
}

/// In-memory record store for testing.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, collection: &str, key: &str, value: &Value) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let records = records.entry(collection.to_string()).or_default();
        if records.contains_key(key) {
            return Err(already_exists(collection, key));
        }
        records.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn read(&self, collection: &str, key: &str) -> Result<Value, StoreError> {
        let records = self.records.read().await;
        records
            .get(collection)
            .and_then(|records| records.get(key))
            .cloned()
            .ok_or_else(|| not_found(collection, key))
    }

    async fn update(&self, collection: &str, key: &str, value: &Value) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let slot = records
            .get_mut(collection)
            .and_then(|records| records.get_mut(key))
            .ok_or_else(|| not_found(collection, key))?;
        *slot = value.clone();
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records
            .get_mut(collection)
            .and_then(|records| records.remove(key))
            .map(|_| ())
            .ok_or_else(|| not_found(collection, key))
    }

    async fn list(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(collection)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default())
    }
}
