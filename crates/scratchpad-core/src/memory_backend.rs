//! In-process backend used for offline mode and tests.
//!
//! Accepts any principal with a non-empty secret unless accounts are
//! registered, in which case the pair must match. Remote calls echo their
//! input back so scripts have something to look at.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    BackendConfig, Credentials, Session,
    traits::{BackendClient, ClientError, ClientFactory},
};

const INVALID_CREDENTIALS: &str = "Invalid login credentials";

/// In-memory backend client.
pub struct InMemoryBackend {
    config: BackendConfig,
    accounts: HashMap<String, String>,
    fail_sign_out: bool,
    session: Mutex<Option<Session>>,
    calls: Mutex<Vec<String>>,
}

impl InMemoryBackend {
    /// Create a backend that accepts any credentials with a non-empty secret.
    #[must_use]
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            accounts: HashMap::new(),
            fail_sign_out: false,
            session: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Names of the operations invoked so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.to_string());
        }
    }

    fn accepts(&self, credentials: &Credentials) -> bool {
        if credentials.secret.is_empty() {
            return false;
        }
        if self.accounts.is_empty() {
            return true;
        }
        self.accounts
            .get(&credentials.principal)
            .is_some_and(|secret| *secret == credentials.secret)
    }

    fn session_slot(&self) -> Result<std::sync::MutexGuard<'_, Option<Session>>, ClientError> {
        self.session
            .lock()
            .map_err(|e| ClientError::Transport(e.to_string()))
    }
}

#[async_trait]
impl BackendClient for InMemoryBackend {
    fn config(&self) -> &BackendConfig {
        &self.config
    }

    async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<(), ClientError> {
        self.record("sign_in_with_password");
        if !self.accepts(credentials) {
            return Err(ClientError::Backend(INVALID_CREDENTIALS.to_string()));
        }
        let session = Session(json!({
            "access_token": Uuid::new_v4().to_string(),
            "token_type": "bearer",
            "user": { "email": credentials.principal },
        }));
        *self.session_slot()? = Some(session);
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), ClientError> {
        self.record("sign_out");
        if self.fail_sign_out {
            return Err(ClientError::Transport("connection reset".to_string()));
        }
        self.session_slot()?.take();
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>, ClientError> {
        self.record("get_session");
        Ok(self.session_slot()?.clone())
    }

    async fn restore_session(&self, session: Session) -> Result<(), ClientError> {
        self.record("restore_session");
        *self.session_slot()? = Some(session);
        Ok(())
    }

    async fn invoke(&self, name: &str, body: Value) -> Result<Value, ClientError> {
        self.record("invoke");
        let authorized = self.session_slot()?.is_some();
        Ok(json!({
            "function": name,
            "body": body,
            "endpoint": self.config.endpoint(),
            "authorized": authorized,
        }))
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        self.record("request");
        Ok(json!({
            "method": method.to_ascii_uppercase(),
            "path": path,
            "body": body,
        }))
    }
}

/// Factory for [`InMemoryBackend`] clients.
#[derive(Default)]
pub struct InMemoryClientFactory {
    accounts: HashMap<String, String>,
    fail_sign_out: bool,
    created: Mutex<Vec<Arc<InMemoryBackend>>>,
}

impl InMemoryClientFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict sign-in to registered accounts.
    #[must_use]
    pub fn with_account(mut self, principal: impl Into<String>, secret: impl Into<String>) -> Self {
        self.accounts.insert(principal.into(), secret.into());
        self
    }

    /// Make every client's sign-out fail with a transport error.
    #[must_use]
    pub const fn failing_sign_out(mut self) -> Self {
        self.fail_sign_out = true;
        self
    }

    /// Every client built so far, oldest first.
    #[must_use]
    pub fn created(&self) -> Vec<Arc<InMemoryBackend>> {
        self.created.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl ClientFactory for InMemoryClientFactory {
    fn create_client(&self, config: &BackendConfig) -> Arc<dyn BackendClient> {
        let client = Arc::new(InMemoryBackend {
            accounts: self.accounts.clone(),
            fail_sign_out: self.fail_sign_out,
            ..InMemoryBackend::new(config.clone())
        });
        if let Ok(mut created) = self.created.lock() {
            created.push(Arc::clone(&client));
        }
        tracing::debug!(endpoint = config.endpoint(), "built in-memory backend client");
        client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> InMemoryBackend {
        InMemoryBackend::new(BackendConfig::new("memory://local", "key"))
    }

    #[tokio::test]
    async fn test_sign_in_creates_session() {
        let client = backend();
        client
            .sign_in_with_password(&Credentials::new("a@b.test", "pw"))
            .await
            .unwrap();

        let session = client.get_session().await.unwrap().unwrap();
        assert!(session.access_token().is_some());
        assert_eq!(session.0["user"]["email"], "a@b.test");
    }

    #[tokio::test]
    async fn test_registered_accounts_are_enforced() {
        let factory = InMemoryClientFactory::new().with_account("a@b.test", "right");
        let client = factory.create_client(&BackendConfig::new("memory://local", "key"));

        let err = client
            .sign_in_with_password(&Credentials::new("a@b.test", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Backend(ref m) if m == INVALID_CREDENTIALS));
        assert!(client.get_session().await.unwrap().is_none());

        client
            .sign_in_with_password(&Credentials::new("a@b.test", "right"))
            .await
            .unwrap();
        assert!(client.get_session().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sign_out_clears_session() {
        let client = backend();
        client
            .sign_in_with_password(&Credentials::new("a@b.test", "pw"))
            .await
            .unwrap();
        client.sign_out().await.unwrap();
        assert!(client.get_session().await.unwrap().is_none());
        assert_eq!(
            client.calls(),
            vec!["sign_in_with_password", "sign_out", "get_session"]
        );
    }

    #[test]
    fn test_factory_tracks_created_clients() {
        let factory = InMemoryClientFactory::new();
        factory.create_client(&BackendConfig::new("memory://a", "k"));
        factory.create_client(&BackendConfig::new("memory://b", "k"));

        let endpoints: Vec<_> = factory
            .created()
            .iter()
            .map(|c| c.config().endpoint().to_string())
            .collect();
        assert_eq!(endpoints, vec!["memory://a", "memory://b"]);
    }

    #[test]
    fn test_failing_sign_out() {
        let factory = InMemoryClientFactory::new().failing_sign_out();
        let client = factory.create_client(&BackendConfig::new("memory://local", "key"));
        let err = tokio_test::block_on(client.sign_out()).unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }

    #[tokio::test]
    async fn test_invoke_echoes_input() {
        let client = backend();
        let out = client
            .invoke("hello", serde_json::json!({ "name": "x" }))
            .await
            .unwrap();
        assert_eq!(out["function"], "hello");
        assert_eq!(out["body"]["name"], "x");
        assert_eq!(out["authorized"], false);
    }
}
