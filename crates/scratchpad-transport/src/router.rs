//! Command dispatch for one panel.
//!
//! Every inbound envelope yields exactly one outbound envelope. Handler
//! errors and panics are turned into the failure variant of the command's
//! own response; only envelopes that name no known command get `error`.

use std::{any::Any, cell::Cell, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use scratchpad_core::{
    Ack, BackendConfig, Credentials, ScriptRequest,
    traits::{ClientError, StorageError},
};
use scratchpad_executor::ScriptEngine;
use scratchpad_session::{ConnectionManager, PersistentStore};
use serde_json::Value;
use thiserror::Error;

use crate::{
    outbox::Outbox,
    protocol::{self, InboundMessage, OutboundMessage},
};

/// Handler failure, reported through the command's failure variant.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Router lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Created,
    Ready,
    /// Terminal.
    Disposed,
}

/// Dispatches inbound envelopes and emits responses into the outbox.
///
/// Holds no per-request state; each command works on the committed state
/// of the connection and the store at call time.
pub struct MessageRouter {
    connection: Arc<ConnectionManager>,
    store: Arc<PersistentStore>,
    engine: ScriptEngine,
    outbox: Arc<Outbox>,
    state: Cell<RouterState>,
}

#[allow(clippy::future_not_send)]
impl MessageRouter {
    #[must_use]
    pub fn new(
        connection: Arc<ConnectionManager>,
        store: Arc<PersistentStore>,
        outbox: Arc<Outbox>,
    ) -> Self {
        let engine = ScriptEngine::new(connection.clone());
        Self {
            connection,
            store,
            engine,
            outbox,
            state: Cell::new(RouterState::Created),
        }
    }

    #[must_use]
    pub fn state(&self) -> RouterState {
        self.state.get()
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Move from `Created` to `Ready`. No effect in any other state.
    pub fn start(&self) {
        if self.state.get() == RouterState::Created {
            self.state.set(RouterState::Ready);
            tracing::debug!("message router ready");
        }
    }

    /// Start and emit an unsolicited `configLoaded`.
    pub async fn startup(&self) {
        self.start();
        let response = self.dispatch(InboundMessage::LoadConfig).await;
        self.emit(response);
    }

    /// Stop processing. Idempotent.
    ///
    /// Returns `true` on the first call only.
    pub fn dispose(&self) -> bool {
        if self.state.replace(RouterState::Disposed) == RouterState::Disposed {
            return false;
        }
        self.outbox.close();
        tracing::debug!("message router disposed");
        true
    }

    /// Handle one inbound text envelope and emit its response.
    pub async fn receive(&self, text: &str) {
        match self.state.get() {
            RouterState::Ready => {}
            state => {
                tracing::warn!(?state, "dropping inbound envelope, router not ready");
                return;
            }
        }
        let response = self.respond(text).await;
        self.emit(response);
    }

    /// Response for one inbound text envelope.
    pub async fn respond(&self, text: &str) -> OutboundMessage {
        match serde_json::from_str::<Value>(text) {
            Ok(raw) => self.dispatch_value(&raw).await,
            Err(e) => {
                tracing::warn!(error = %e, "inbound envelope is not JSON");
                OutboundMessage::Error {
                    error: format!("Invalid message: {e}"),
                }
            }
        }
    }

    /// Response for one decoded-from-JSON envelope.
    pub async fn dispatch_value(&self, raw: &Value) -> OutboundMessage {
        match protocol::decode(raw) {
            Ok(msg) => self.dispatch(msg).await,
            Err(e) => {
                tracing::warn!(error = %e, "rejected inbound envelope");
                e.into_response()
            }
        }
    }

    /// Response for one command.
    pub async fn dispatch(&self, msg: InboundMessage) -> OutboundMessage {
        let kind = msg.kind();
        tracing::debug!(command = kind.name(), "dispatching command");

        match AssertUnwindSafe(self.handle(msg)).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!(command = kind.name(), error = %e, "command failed");
                kind.failure(e.to_string())
            }
            Err(panic) => {
                let error = panic_message(panic.as_ref());
                tracing::error!(command = kind.name(), %error, "command handler panicked");
                kind.failure(error)
            }
        }
    }

    fn emit(&self, response: OutboundMessage) {
        if self.state.get() == RouterState::Disposed {
            tracing::debug!(
                command = response.command(),
                "dropping response, router disposed"
            );
            return;
        }
        self.outbox.push(response);
    }

    async fn handle(&self, msg: InboundMessage) -> Result<OutboundMessage, RouterError> {
        match msg {
            InboundMessage::LoadConfig => self.load_config().await,
            InboundMessage::SaveConfig { config } => self.save_config(&config).await,
            InboundMessage::SignIn { auth } => self.sign_in(&auth).await,
            InboundMessage::SignOut => self.sign_out().await,
            InboundMessage::ExecuteFunction { code, variables } => {
                let request = ScriptRequest { code, variables };
                let result = self.engine.execute(&request).await;
                Ok(OutboundMessage::FunctionResult { result })
            }
        }
    }

    async fn load_config(&self) -> Result<OutboundMessage, RouterError> {
        let Some(config) = self.store.get_config()? else {
            return Ok(OutboundMessage::ConfigLoaded {
                config: None,
                error: None,
            });
        };

        self.connection.initialize(&config);
        self.restore_session().await?;
        Ok(OutboundMessage::ConfigLoaded {
            config: Some(config),
            error: None,
        })
    }

    /// Hand the persisted session to the freshly built client.
    async fn restore_session(&self) -> Result<(), RouterError> {
        let (Some(session), Some(client)) = (self.store.get_session()?, self.connection.client())
        else {
            return Ok(());
        };
        if let Err(e) = client.restore_session(session).await {
            tracing::warn!(error = %e, "failed to restore persisted session");
        } else {
            tracing::info!("persisted session restored");
        }
        Ok(())
    }

    async fn save_config(&self, config: &BackendConfig) -> Result<OutboundMessage, RouterError> {
        self.store.put_config(config).await?;
        self.connection.initialize(config);
        Ok(OutboundMessage::ConfigSaved(Ack::Ok))
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<OutboundMessage, RouterError> {
        let result = self.connection.sign_in(credentials).await;
        if result.is_ok() {
            self.persist_session().await?;
        }
        Ok(OutboundMessage::SignInResult { result })
    }

    async fn persist_session(&self) -> Result<(), RouterError> {
        let Some(client) = self.connection.client() else {
            return Ok(());
        };
        if let Some(session) = client.get_session().await? {
            self.store.put_session(&session).await?;
        }
        Ok(())
    }

    async fn sign_out(&self) -> Result<OutboundMessage, RouterError> {
        self.connection.sign_out().await;
        self.store.clear_session().await?;
        Ok(OutboundMessage::SignOutResult(Ack::Ok))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "command handler panicked".to_string())
}
