//! Ownership of the single live backend client.

use std::sync::{Arc, RwLock};

use scratchpad_core::{
    Ack, BackendConfig, Credentials, NOT_INITIALIZED,
    traits::{BackendClient, ClientError, ClientFactory, ClientSource},
};

/// Owns the one live client and mediates sign-in and sign-out.
///
/// Other components read [`ConnectionManager::client`] fresh on every use,
/// so replacing the client is atomic from their point of view.
pub struct ConnectionManager {
    factory: Arc<dyn ClientFactory>,
    client: RwLock<Option<Arc<dyn BackendClient>>>,
}

impl ConnectionManager {
    /// Create a manager with no client.
    #[must_use]
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            client: RwLock::new(None),
        }
    }

    /// Build a client for `config`, replacing any previous one.
    pub fn initialize(&self, config: &BackendConfig) {
        let client = self.factory.create_client(config);
        match self.client.write() {
            Ok(mut slot) => *slot = Some(client),
            Err(poisoned) => *poisoned.into_inner() = Some(client),
        }
        tracing::info!(endpoint = config.endpoint(), "backend client initialized");
    }

    /// The live client, if any.
    #[must_use]
    pub fn client(&self) -> Option<Arc<dyn BackendClient>> {
        match self.client.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Sign in through the live client.
    ///
    /// Never returns an error: a missing client, a backend refusal and a
    /// transport failure all become [`Ack::Failed`].
    pub async fn sign_in(&self, credentials: &Credentials) -> Ack {
        let Some(client) = self.client() else {
            return Ack::failed(NOT_INITIALIZED);
        };

        match client.sign_in_with_password(credentials).await {
            Ok(()) => {
                tracing::info!(principal = %credentials.principal, "signed in");
                Ack::Ok
            }
            Err(ClientError::Backend(message)) => {
                tracing::info!(principal = %credentials.principal, %message, "sign-in refused");
                Ack::Failed(message)
            }
            Err(e) => {
                tracing::warn!(error = %e, "sign-in failed");
                Ack::Failed(e.to_string())
            }
        }
    }

    /// Sign out through the live client. No-op without one.
    ///
    /// Backend errors are logged and swallowed.
    pub async fn sign_out(&self) {
        let Some(client) = self.client() else {
            tracing::debug!("sign-out without a client");
            return;
        };

        if let Err(e) = client.sign_out().await {
            tracing::warn!(error = %e, "sign-out failed, ignoring");
        }
    }
}

impl ClientSource for ConnectionManager {
    fn current_client(&self) -> Option<Arc<dyn BackendClient>> {
        self.client()
    }
}
