//! Data model shared by every layer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies one backend target.
///
/// Immutable once constructed: reconfiguration builds a new value and
/// replaces the old one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Base URL of the backend.
    #[serde(alias = "url")]
    endpoint: String,
    /// Public key sent with every request.
    #[serde(alias = "anonKey")]
    credential_key: String,
}

impl BackendConfig {
    /// Create a new backend config.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, credential_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential_key: credential_key.into(),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub fn credential_key(&self) -> &str {
        &self.credential_key
    }
}

/// Sign-in credentials. Never persisted.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(alias = "email")]
    pub principal: String,
    #[serde(alias = "password")]
    pub secret: String,
}

impl Credentials {
    #[must_use]
    pub fn new(principal: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Opaque backend-issued authentication state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Session(pub Value);

impl Session {
    /// Bearer token carried by the session, if the backend issued one.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.0.get("access_token").and_then(Value::as_str)
    }
}

/// A script to run against the live client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptRequest {
    /// Body of the asynchronous unit of work.
    pub code: String,
    /// Flat string mapping handed to the script as `variables`.
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

impl ScriptRequest {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            variables: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }
}

/// Outcome of one script execution.
///
/// Serialized as `{ success, error?, data?, executionTimeMs? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "OutcomeWire", try_from = "OutcomeWire")]
pub enum ScriptResult {
    Success {
        data: Value,
        execution_time_ms: u64,
    },
    Failure {
        error: String,
    },
}

impl ScriptResult {
    #[must_use]
    pub const fn success(data: Value, execution_time_ms: u64) -> Self {
        Self::Success {
            data,
            execution_time_ms,
        }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failure { error } => Some(error),
            Self::Success { .. } => None,
        }
    }

    #[must_use]
    pub const fn data(&self) -> Option<&Value> {
        match self {
            Self::Success { data, .. } => Some(data),
            Self::Failure { .. } => None,
        }
    }
}

/// Plain success/failure outcome, serialized as `{ success, error? }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "OutcomeWire", try_from = "OutcomeWire")]
pub enum Ack {
    Ok,
    Failed(String),
}

impl Ack {
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed(error.into())
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed(error) => Some(error),
            Self::Ok => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutcomeWire {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    execution_time_ms: Option<u64>,
}

impl From<ScriptResult> for OutcomeWire {
    fn from(result: ScriptResult) -> Self {
        match result {
            ScriptResult::Success {
                data,
                execution_time_ms,
            } => Self {
                success: true,
                error: None,
                data: Some(data),
                execution_time_ms: Some(execution_time_ms),
            },
            ScriptResult::Failure { error } => Self {
                success: false,
                error: Some(error),
                data: None,
                execution_time_ms: None,
            },
        }
    }
}

impl TryFrom<OutcomeWire> for ScriptResult {
    type Error = String;

    fn try_from(wire: OutcomeWire) -> Result<Self, Self::Error> {
        if wire.success {
            Ok(Self::Success {
                data: wire.data.unwrap_or(Value::Null),
                execution_time_ms: wire.execution_time_ms.unwrap_or_default(),
            })
        } else {
            wire.error
                .map(|error| Self::Failure { error })
                .ok_or_else(|| "failed result without an error message".to_string())
        }
    }
}

impl From<Ack> for OutcomeWire {
    fn from(ack: Ack) -> Self {
        Self {
            success: ack.is_ok(),
            error: match ack {
                Ack::Ok => None,
                Ack::Failed(error) => Some(error),
            },
            data: None,
            execution_time_ms: None,
        }
    }
}

impl TryFrom<OutcomeWire> for Ack {
    type Error = String;

    fn try_from(wire: OutcomeWire) -> Result<Self, Self::Error> {
        if wire.success {
            Ok(Self::Ok)
        } else {
            wire.error
                .map(Self::Failed)
                .ok_or_else(|| "failed result without an error message".to_string())
        }
    }
}
