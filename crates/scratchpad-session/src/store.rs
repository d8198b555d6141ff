//! Persistent configuration and session slots.

use std::sync::{Arc, OnceLock};

use scratchpad_core::{
    BackendConfig, Session,
    traits::{KeyValueStore, StorageError},
};

/// Fixed key for the current backend config.
pub const CONFIG_KEY: &str = "backend-config";
/// Fixed key for the most recent session.
pub const SESSION_KEY: &str = "user-session";

/// Two fixed-key slots on top of the host key/value facility.
///
/// Must be bound once with [`PersistentStore::initialize`]; every other
/// call fails with [`StorageError::NotInitialized`] until then.
#[derive(Default)]
pub struct PersistentStore {
    backend: OnceLock<Arc<dyn KeyValueStore>>,
}

impl PersistentStore {
    /// Create an unbound store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already bound to `backend`.
    #[must_use]
    pub fn with_backend(backend: Arc<dyn KeyValueStore>) -> Self {
        let store = Self::new();
        let _ = store.backend.set(backend);
        store
    }

    /// Bind the store to the host facility.
    ///
    /// # Errors
    /// Returns error if the store is already bound.
    pub fn initialize(&self, backend: Arc<dyn KeyValueStore>) -> Result<(), StorageError> {
        self.backend
            .set(backend)
            .map_err(|_| StorageError::AlreadyInitialized)?;
        tracing::info!("persistent store initialized");
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.backend.get().is_some()
    }

    fn backend(&self) -> Result<&Arc<dyn KeyValueStore>, StorageError> {
        self.backend.get().ok_or(StorageError::NotInitialized)
    }

    /// Persist the backend config. Last write wins.
    ///
    /// # Errors
    /// Returns error if the store is unbound or the write fails.
    pub async fn put_config(&self, config: &BackendConfig) -> Result<(), StorageError> {
        let value = serde_json::to_value(config)?;
        self.backend()?.put(CONFIG_KEY, Some(value)).await?;
        tracing::info!(endpoint = config.endpoint(), "backend config saved");
        Ok(())
    }

    /// Read the stored backend config.
    ///
    /// # Errors
    /// Returns error if the store is unbound or the slot holds something
    /// that is not a config.
    pub fn get_config(&self) -> Result<Option<BackendConfig>, StorageError> {
        self.backend()?
            .get(CONFIG_KEY)
            .filter(|v| !v.is_null())
            .map(serde_json::from_value)
            .transpose()
            .map_err(StorageError::from)
    }

    /// Persist the session.
    ///
    /// # Errors
    /// Returns error if the store is unbound or the write fails.
    pub async fn put_session(&self, session: &Session) -> Result<(), StorageError> {
        let value = serde_json::to_value(session)?;
        self.backend()?.put(SESSION_KEY, Some(value)).await?;
        tracing::info!("user session saved");
        Ok(())
    }

    /// Read the stored session.
    ///
    /// # Errors
    /// Returns error if the store is unbound.
    pub fn get_session(&self) -> Result<Option<Session>, StorageError> {
        Ok(self
            .backend()?
            .get(SESSION_KEY)
            .filter(|v| !v.is_null())
            .map(Session))
    }

    /// Clear the session slot.
    ///
    /// # Errors
    /// Returns error if the store is unbound or the write fails.
    pub async fn clear_session(&self) -> Result<(), StorageError> {
        self.backend()?.put(SESSION_KEY, None).await?;
        tracing::info!("user session cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::storage::MemoryStore;

    fn bound() -> PersistentStore {
        PersistentStore::with_backend(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_unbound_store_fails_fast() {
        let store = PersistentStore::new();
        assert!(matches!(store.get_config(), Err(StorageError::NotInitialized)));
        assert!(matches!(store.get_session(), Err(StorageError::NotInitialized)));
        assert!(matches!(
            store.clear_session().await,
            Err(StorageError::NotInitialized)
        ));
        assert!(matches!(
            store.put_config(&BackendConfig::new("e", "k")).await,
            Err(StorageError::NotInitialized)
        ));
    }

    #[test]
    fn test_initialize_only_once() {
        let store = PersistentStore::new();
        tokio_test::assert_ok!(store.initialize(Arc::new(MemoryStore::new())));
        assert!(store.is_initialized());
        assert!(matches!(
            store.initialize(Arc::new(MemoryStore::new())),
            Err(StorageError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn test_config_last_write_wins() {
        let store = bound();
        assert!(store.get_config().unwrap().is_none());

        store.put_config(&BackendConfig::new("a", "k1")).await.unwrap();
        store.put_config(&BackendConfig::new("b", "k2")).await.unwrap();
        assert_eq!(store.get_config().unwrap(), Some(BackendConfig::new("b", "k2")));
    }

    #[tokio::test]
    async fn test_session_put_and_clear() {
        let store = bound();
        let session = Session(json!({ "access_token": "t" }));

        store.put_session(&session).await.unwrap();
        assert_eq!(store.get_session().unwrap(), Some(session));

        store.clear_session().await.unwrap();
        assert!(store.get_session().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_foreign_config_value_is_reported() {
        let backend = Arc::new(MemoryStore::new());
        backend.put(CONFIG_KEY, Some(json!(42))).await.unwrap();
        let store = PersistentStore::with_backend(backend);
        assert!(matches!(store.get_config(), Err(StorageError::Serialization(_))));
    }
}
