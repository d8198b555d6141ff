//! Connection lifecycle and persistent state.
//!
//! Provides:
//! - `ConnectionManager` - owns the single live backend client
//! - `PersistentStore` - config and session slots over a durable key/value store
//! - Storage implementations (memory, JSON file, SQLite)
//! - HTTP backend client

pub mod client;
pub mod connection;
pub mod storage;
pub mod store;

pub use connection::ConnectionManager;
pub use store::PersistentStore;
