//! Envelope protocol between the UI surface and the core.
//!
//! Every envelope is a JSON object tagged by `command`.

use std::collections::HashMap;

use scratchpad_core::{Ack, BackendConfig, Credentials, ScriptResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command from the UI surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum InboundMessage {
    /// Read the stored config and connect with it.
    LoadConfig,
    /// Store a new config and connect with it.
    SaveConfig { config: BackendConfig },
    /// Sign in and persist the resulting session.
    SignIn { auth: Credentials },
    /// Sign out and clear the persisted session.
    SignOut,
    /// Run a script.
    ExecuteFunction {
        code: String,
        #[serde(default)]
        variables: HashMap<String, String>,
    },
}

impl InboundMessage {
    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::LoadConfig => CommandKind::LoadConfig,
            Self::SaveConfig { .. } => CommandKind::SaveConfig,
            Self::SignIn { .. } => CommandKind::SignIn,
            Self::SignOut => CommandKind::SignOut,
            Self::ExecuteFunction { .. } => CommandKind::ExecuteFunction,
        }
    }
}

/// Envelope sent to the UI surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum OutboundMessage {
    ConfigLoaded {
        config: Option<BackendConfig>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ConfigSaved(Ack),
    SignInResult {
        result: Ack,
    },
    SignOutResult(Ack),
    FunctionResult {
        result: ScriptResult,
    },
    /// Dispatch-level failure not attributable to a known command.
    Error {
        error: String,
    },
}

impl OutboundMessage {
    /// Wire name of this envelope's command.
    #[must_use]
    pub const fn command(&self) -> &'static str {
        match self {
            Self::ConfigLoaded { .. } => "configLoaded",
            Self::ConfigSaved(_) => "configSaved",
            Self::SignInResult { .. } => "signInResult",
            Self::SignOutResult(_) => "signOutResult",
            Self::FunctionResult { .. } => "functionResult",
            Self::Error { .. } => "error",
        }
    }
}

/// Recognized inbound commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    LoadConfig,
    SaveConfig,
    SignIn,
    SignOut,
    ExecuteFunction,
}

impl CommandKind {
    pub const ALL: [Self; 5] = [
        Self::LoadConfig,
        Self::SaveConfig,
        Self::SignIn,
        Self::SignOut,
        Self::ExecuteFunction,
    ];

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Wire name of the inbound command.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LoadConfig => "loadConfig",
            Self::SaveConfig => "saveConfig",
            Self::SignIn => "signIn",
            Self::SignOut => "signOut",
            Self::ExecuteFunction => "executeFunction",
        }
    }

    /// The failure-shaped response for this command.
    #[must_use]
    pub fn failure(self, error: impl Into<String>) -> OutboundMessage {
        let error = error.into();
        match self {
            Self::LoadConfig => OutboundMessage::ConfigLoaded {
                config: None,
                error: Some(error),
            },
            Self::SaveConfig => OutboundMessage::ConfigSaved(Ack::Failed(error)),
            Self::SignIn => OutboundMessage::SignInResult {
                result: Ack::Failed(error),
            },
            Self::SignOut => OutboundMessage::SignOutResult(Ack::Failed(error)),
            Self::ExecuteFunction => OutboundMessage::FunctionResult {
                result: ScriptResult::failure(error),
            },
        }
    }
}

/// Why an inbound envelope could not be turned into a command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The command is known but its payload is not.
    #[error("Invalid {} payload: {reason}", .kind.name())]
    Malformed { kind: CommandKind, reason: String },
    /// No recognizable command at all.
    #[error("{0}")]
    Unrecognized(String),
}

impl DecodeError {
    /// Response envelope for this decode failure.
    #[must_use]
    pub fn into_response(self) -> OutboundMessage {
        match self {
            Self::Malformed { kind, .. } => kind.failure(self.to_string()),
            Self::Unrecognized(error) => OutboundMessage::Error { error },
        }
    }
}

/// Decode one inbound envelope.
///
/// # Errors
/// Returns error if the envelope has no known command or a bad payload.
pub fn decode(raw: &Value) -> Result<InboundMessage, DecodeError> {
    let Some(fields) = raw.as_object() else {
        return Err(DecodeError::Unrecognized(
            "Invalid message: envelope is not an object".to_string(),
        ));
    };
    let Some(name) = fields.get("command").and_then(Value::as_str) else {
        return Err(DecodeError::Unrecognized(
            "Invalid message: missing command".to_string(),
        ));
    };
    let Some(kind) = CommandKind::from_name(name) else {
        return Err(DecodeError::Unrecognized(format!("Unknown command: {name}")));
    };

    serde_json::from_value(raw.clone()).map_err(|e| DecodeError::Malformed {
        kind,
        reason: e.to_string(),
    })
}

/// Decode one inbound envelope from its text form.
///
/// # Errors
/// Returns error if the text is not JSON or [`decode`] fails.
pub fn decode_text(text: &str) -> Result<InboundMessage, DecodeError> {
    let raw: Value = serde_json::from_str(text)
        .map_err(|e| DecodeError::Unrecognized(format!("Invalid message: {e}")))?;
    decode(&raw)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_inbound_wire_format() {
        let msg = decode(&json!({
            "command": "saveConfig",
            "config": { "url": "https://x.test", "anonKey": "k" }
        }))
        .unwrap();
        match msg {
            InboundMessage::SaveConfig { config } => {
                assert_eq!(config, BackendConfig::new("https://x.test", "k"));
            }
            other => panic!("Wrong message type: {other:?}"),
        }

        let msg = decode(&json!({
            "command": "signIn",
            "auth": { "email": "a@b.test", "password": "pw" }
        }))
        .unwrap();
        assert_eq!(msg.kind(), CommandKind::SignIn);

        let msg = decode(&json!({ "command": "executeFunction", "code": "return 1" })).unwrap();
        match msg {
            InboundMessage::ExecuteFunction { code, variables } => {
                assert_eq!(code, "return 1");
                assert!(variables.is_empty());
            }
            other => panic!("Wrong message type: {other:?}"),
        }
    }

    #[test]
    fn test_outbound_wire_format() {
        let saved = serde_json::to_value(OutboundMessage::ConfigSaved(Ack::Ok)).unwrap();
        assert_eq!(saved, json!({ "command": "configSaved", "success": true }));

        let signed_out =
            serde_json::to_value(OutboundMessage::SignOutResult(Ack::failed("x"))).unwrap();
        assert_eq!(
            signed_out,
            json!({ "command": "signOutResult", "success": false, "error": "x" })
        );

        let loaded = serde_json::to_value(OutboundMessage::ConfigLoaded {
            config: None,
            error: None,
        })
        .unwrap();
        assert_eq!(loaded, json!({ "command": "configLoaded", "config": null }));

        let result = serde_json::to_value(OutboundMessage::FunctionResult {
            result: ScriptResult::success(json!(2), 1),
        })
        .unwrap();
        assert_eq!(
            result,
            json!({
                "command": "functionResult",
                "result": { "success": true, "data": 2, "executionTimeMs": 1 }
            })
        );
    }

    #[test]
    fn test_outbound_parses_back() {
        let parsed: OutboundMessage =
            serde_json::from_value(json!({ "command": "configSaved", "success": true })).unwrap();
        assert_eq!(parsed, OutboundMessage::ConfigSaved(Ack::Ok));
    }

    #[test]
    fn test_failure_keeps_command_identity() {
        for kind in CommandKind::ALL {
            let failure = kind.failure("boom");
            assert_ne!(failure.command(), "error");
            let json = serde_json::to_string(&failure).unwrap();
            assert!(json.contains("boom"), "{json}");
        }
    }

    #[test]
    fn test_malformed_known_command() {
        let err = decode(&json!({ "command": "saveConfig" })).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Malformed {
                kind: CommandKind::SaveConfig,
                ..
            }
        ));
        assert_eq!(err.into_response().command(), "configSaved");
    }

    #[test]
    fn test_unrecognized_envelopes() {
        for raw in [json!({ "command": "dropTables" }), json!({ "cmd": "x" }), json!([1])] {
            let err = decode(&raw).unwrap_err();
            assert!(matches!(err, DecodeError::Unrecognized(_)));
            assert_eq!(err.into_response().command(), "error");
        }

        let err = decode_text("{ nope").unwrap_err();
        assert!(err.to_string().starts_with("Invalid message"));
    }
}
