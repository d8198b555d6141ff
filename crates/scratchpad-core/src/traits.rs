//! Collaborator traits: backend client and durable key/value store.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::{BackendConfig, Credentials, Session};

/// Message reported when an operation needs a client and none exists.
pub const NOT_INITIALIZED: &str = "Backend client is not initialized.";

/// Backend client error.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Structured failure reported by the backend. The message is shown verbatim.
    #[error("{0}")]
    Backend(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Handle to one live backend connection.
///
/// Exactly one handle is current at a time; scripts receive it with full
/// access to everything it can do.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Configuration this client was built from.
    fn config(&self) -> &BackendConfig;

    /// Authenticate with a principal and secret.
    async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<(), ClientError>;

    /// End the current session.
    async fn sign_out(&self) -> Result<(), ClientError>;

    /// Current session, if signed in.
    async fn get_session(&self) -> Result<Option<Session>, ClientError>;

    /// Adopt a previously persisted session.
    async fn restore_session(&self, session: Session) -> Result<(), ClientError>;

    /// Invoke a named remote function with a JSON body.
    async fn invoke(&self, name: &str, body: Value) -> Result<Value, ClientError>;

    /// Generic request relative to the configured endpoint.
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError>;
}

/// Builds backend clients. Construction is local and cannot fail.
pub trait ClientFactory: Send + Sync {
    fn create_client(&self, config: &BackendConfig) -> Arc<dyn BackendClient>;
}

/// Anything that can hand out the current client at call time.
pub trait ClientSource: Send + Sync {
    fn current_client(&self) -> Option<Arc<dyn BackendClient>>;
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Persistent store is not initialized. Call initialize() first.")]
    NotInitialized,
    #[error("Persistent store is already initialized")]
    AlreadyInitialized,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Host durable key/value facility.
///
/// Reads hit an in-memory mirror; writes may suspend until the value is durable.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value from the mirror.
    fn get(&self, key: &str) -> Option<Value>;

    /// Write a value. `None` clears the slot.
    async fn put(&self, key: &str, value: Option<Value>) -> Result<(), StorageError>;
}
