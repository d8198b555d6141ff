//! Backend client implementations.

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{HttpBackendClient, HttpClientFactory};
