//! In-memory key/value storage.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use scratchpad_core::traits::{KeyValueStore, StorageError};
use serde_json::Value;

/// In-memory storage implementation.
///
/// Useful for development and tests.
/// Data is lost on restart.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().ok()?.get(key).cloned()
    }

    async fn put(&self, key: &str, value: Option<Value>) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        match value {
            Some(value) => {
                entries.insert(key.to_string(), value);
            }
            None => {
                entries.remove(key);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_put_get_clear() {
        let store = MemoryStore::new();
        assert!(store.get("a").is_none());

        store.put("a", Some(json!({ "x": 1 }))).await.unwrap();
        assert_eq!(store.get("a"), Some(json!({ "x": 1 })));

        store.put("a", None).await.unwrap();
        assert!(store.get("a").is_none());
        assert!(store.is_empty());
    }
}
