//! Ephemeral credentials for a single realtime session.
//!
//! The client side asks the token broker (`GET /token`) for a short-lived
//! bearer credential. The broker itself mints it by POSTing
//! `{"model", "voice"}` to the sessions endpoint with the server-held API key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::config::{OpenAIRealtimeModel, OpenAIRealtimeVoice};
use crate::core::realtime::base::{RealtimeError, RealtimeResult};

/// Short-lived bearer credential scoped to one realtime session.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EphemeralCredential {
    value: String,
}

impl EphemeralCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// The raw credential, for use in an `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EphemeralCredential(***)")
    }
}

/// Body returned by the token broker.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    client_secret: ClientSecret,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: String,
    #[serde(default)]
    expires_at: Option<i64>,
}

/// Source of ephemeral credentials.
#[async_trait]
pub trait TokenBroker: Send + Sync {
    /// Fetch a fresh credential. Single attempt, no retry.
    async fn fetch_credential(&self) -> RealtimeResult<EphemeralCredential>;
}

/// Token broker reached over HTTP (`GET <url>`).
#[derive(Debug, Clone)]
pub struct HttpTokenBroker {
    client: reqwest::Client,
    url: String,
}

impl HttpTokenBroker {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TokenBroker for HttpTokenBroker {
    async fn fetch_credential(&self) -> RealtimeResult<EphemeralCredential> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| RealtimeError::Credential(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RealtimeError::Credential(format!(
                "token endpoint returned {status}"
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| RealtimeError::Credential(format!("invalid token response: {e}")))?;

        if body.client_secret.value.is_empty() {
            return Err(RealtimeError::Credential(
                "token response carried an empty client secret".to_string(),
            ));
        }

        debug!(
            expires_at = ?body.client_secret.expires_at,
            "Fetched ephemeral credential"
        );
        Ok(EphemeralCredential::new(body.client_secret.value.clone()))
    }
}

/// Request body sent to the sessions endpoint.
#[derive(Debug, Serialize)]
struct SessionTokenRequest<'a> {
    model: &'a str,
    voice: &'a str,
}

/// Mint a session credential with the server-held API key.
///
/// The upstream JSON body is returned untouched so the broker can hand it to
/// the client verbatim.
pub async fn mint_session_token(
    client: &reqwest::Client,
    sessions_url: &str,
    api_key: &str,
    model: OpenAIRealtimeModel,
    voice: OpenAIRealtimeVoice,
) -> RealtimeResult<serde_json::Value> {
    let response = client
        .post(sessions_url)
        .bearer_auth(api_key)
        .json(&SessionTokenRequest {
            model: model.as_str(),
            voice: voice.as_str(),
        })
        .send()
        .await
        .map_err(|e| RealtimeError::Credential(format!("session request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!(%status, body = %body, "Session minting rejected");
        return Err(RealtimeError::Credential(format!(
            "sessions endpoint returned {status}"
        )));
    }

    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| RealtimeError::Credential(format!("invalid session response: {e}")))
}
