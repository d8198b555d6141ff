//! JSON file key/value storage.
//!
//! The whole map lives in memory and is rewritten to disk on every put,
//! through a temp file and a rename so a crash never leaves a torn file.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::RwLock,
};

use async_trait::async_trait;
use scratchpad_core::traits::{KeyValueStore, StorageError};
use serde_json::Value;
use tokio::sync::Mutex;

/// File-backed storage implementation.
pub struct JsonFileStore {
    path: PathBuf,
    mirror: RwLock<BTreeMap<String, Value>>,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open the store, loading existing state from `path` if present.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let mirror = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), entries = mirror.len(), "opened state file");

        Ok(Self {
            path,
            mirror: RwLock::new(mirror),
            write_lock: Mutex::new(()),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, snapshot: &BTreeMap<String, Value>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.mirror.read().ok()?.get(key).cloned()
    }

    async fn put(&self, key: &str, value: Option<Value>) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;

        // The mirror only changes once the new state is on disk.
        let mut snapshot = self
            .mirror
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .clone();
        match value {
            Some(value) => {
                snapshot.insert(key.to_string(), value);
            }
            None => {
                snapshot.remove(key);
            }
        }

        self.flush(&snapshot).await?;

        *self
            .mirror
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))? = snapshot;
        Ok(())
    }
}
