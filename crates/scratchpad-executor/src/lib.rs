//! Script execution against a live backend client.
//!
//! Provides:
//! - `ScriptEngine` - compile and run script text in embedded QuickJS
//! - Client bridge exposing the backend handle to scripts

pub mod bridge;
pub mod engine;

pub use bridge::SCRIPT_LOG_TARGET;
pub use engine::{ScriptEngine, ScriptError};
