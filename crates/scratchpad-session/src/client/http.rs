//! HTTP backend client.
//!
//! Speaks the password-grant auth API (`/auth/v1/*`) and the function
//! invocation API (`/functions/v1/{name}`) of a hosted backend.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use scratchpad_core::{
    BackendConfig, Credentials, Session,
    traits::{BackendClient, ClientError, ClientFactory},
};
use serde_json::{Value, json};

/// Backend client over HTTP.
pub struct HttpBackendClient {
    http: reqwest::Client,
    config: BackendConfig,
    session: RwLock<Option<Session>>,
}

impl HttpBackendClient {
    /// Create a client sharing the given connection pool.
    #[must_use]
    pub fn new(http: reqwest::Client, config: BackendConfig) -> Self {
        Self {
            http,
            config,
            session: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.endpoint().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn current_session(&self) -> Option<Session> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    fn set_session(&self, session: Option<Session>) {
        match self.session.write() {
            Ok(mut slot) => *slot = session,
            Err(poisoned) => *poisoned.into_inner() = session,
        }
    }

    /// Attach the key header and the best available bearer token.
    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let session = self.current_session();
        let token = session
            .as_ref()
            .and_then(Session::access_token)
            .unwrap_or_else(|| self.config.credential_key())
            .to_string();
        builder
            .header("apikey", self.config.credential_key())
            .bearer_auth(token)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value, ClientError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        read_body(response).await
    }
}

/// Decode a response, turning non-2xx bodies into backend errors.
async fn read_body(response: Response) -> Result<Value, ClientError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;

    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };

    if status.is_success() {
        Ok(body)
    } else {
        Err(ClientError::Backend(error_message(&body).unwrap_or_else(|| {
            format!("Request failed with status {status}")
        })))
    }
}

fn error_message(body: &Value) -> Option<String> {
    if let Some(s) = body.as_str() {
        return Some(s.to_string());
    }
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str))
        .map(ToString::to_string)
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    fn config(&self) -> &BackendConfig {
        &self.config
    }

    async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<(), ClientError> {
        let builder = self
            .http
            .post(self.url("auth/v1/token"))
            .query(&[("grant_type", "password")])
            .header("apikey", self.config.credential_key())
            .json(&json!({
                "email": credentials.principal,
                "password": credentials.secret,
            }));

        let body = self.send(builder).await?;
        if body.get("access_token").is_none() {
            return Err(ClientError::Decode(
                "sign-in response carried no access token".to_string(),
            ));
        }
        self.set_session(Some(Session(body)));
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), ClientError> {
        if self.current_session().is_none() {
            return Ok(());
        }
        let builder = self.authorize(self.http.post(self.url("auth/v1/logout")));
        let result = self.send(builder).await;
        // The local session is gone either way.
        self.set_session(None);
        result.map(|_| ())
    }

    async fn get_session(&self) -> Result<Option<Session>, ClientError> {
        Ok(self.current_session())
    }

    async fn restore_session(&self, session: Session) -> Result<(), ClientError> {
        if session.access_token().is_none() {
            return Err(ClientError::Decode(
                "stored session has no access token".to_string(),
            ));
        }
        self.set_session(Some(session));
        Ok(())
    }

    async fn invoke(&self, name: &str, body: Value) -> Result<Value, ClientError> {
        let path = format!("functions/v1/{}", name.trim_start_matches('/'));
        let builder = self.authorize(self.http.post(self.url(&path))).json(&body);
        self.send(builder).await
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|e| ClientError::Transport(format!("invalid method {method}: {e}")))?;
        let mut builder = self.authorize(self.http.request(method, self.url(path)));
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        self.send(builder).await
    }
}

/// Builds [`HttpBackendClient`]s that share one connection pool.
#[derive(Clone, Default)]
pub struct HttpClientFactory {
    http: reqwest::Client,
}

impl HttpClientFactory {
    #[must_use]
    pub const fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl ClientFactory for HttpClientFactory {
    fn create_client(&self, config: &BackendConfig) -> Arc<dyn BackendClient> {
        Arc::new(HttpBackendClient::new(self.http.clone(), config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(endpoint: &str) -> HttpBackendClient {
        HttpBackendClient::new(reqwest::Client::new(), BackendConfig::new(endpoint, "anon"))
    }

    #[test]
    fn test_url_joining() {
        let c = client("https://x.test/");
        assert_eq!(c.url("/auth/v1/token"), "https://x.test/auth/v1/token");
        assert_eq!(c.url("rest/v1/items"), "https://x.test/rest/v1/items");
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(&json!({ "error": "invalid_grant", "error_description": "Invalid login credentials" })),
            Some("Invalid login credentials".to_string())
        );
        assert_eq!(
            error_message(&json!({ "msg": "Email not confirmed" })),
            Some("Email not confirmed".to_string())
        );
        assert_eq!(error_message(&json!("plain text")), Some("plain text".to_string()));
        assert_eq!(error_message(&json!({ "code": 500 })), None);
    }

    #[tokio::test]
    async fn test_restore_requires_token() {
        let c = client("https://x.test");
        let err = c.restore_session(Session(json!({}))).await.unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));

        c.restore_session(Session(json!({ "access_token": "t" })))
            .await
            .unwrap();
        assert_eq!(
            c.get_session().await.unwrap().and_then(|s| s.access_token().map(String::from)),
            Some("t".to_string())
        );
    }

    #[tokio::test]
    async fn test_sign_out_without_session_is_local() {
        // Unroutable endpoint: reaching the network would fail.
        let c = client("http://127.0.0.1:9");
        c.sign_out().await.unwrap();
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported() {
        let c = client("http://127.0.0.1:9");
        let err = c
            .sign_in_with_password(&Credentials::new("a@b.test", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
