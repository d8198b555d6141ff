//! Core abstractions for the scratchpad script runner.
//!
//! This crate provides the fundamental building blocks:
//! - Data model (`BackendConfig`, `Credentials`, `Session`, `ScriptRequest`, `ScriptResult`)
//! - Collaborator traits (`BackendClient`, `ClientFactory`, `KeyValueStore`)
//! - `InMemoryBackend` - offline backend for demos and tests

pub mod memory_backend;
pub mod model;
pub mod traits;

pub use memory_backend::{InMemoryBackend, InMemoryClientFactory};
pub use model::{Ack, BackendConfig, Credentials, ScriptRequest, ScriptResult, Session};
pub use traits::{
    BackendClient, ClientError, ClientFactory, ClientSource, KeyValueStore, NOT_INITIALIZED,
    StorageError,
};
