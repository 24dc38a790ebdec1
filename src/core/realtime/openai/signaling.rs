//! SDP offer/answer exchange with the realtime endpoint.
//!
//! - Endpoint: `POST <realtime-url>?model=<model>`
//! - Body: the local offer, `Content-Type: application/sdp`
//! - Auth: the ephemeral credential as a bearer token
//! - Response: the remote answer as raw SDP text

use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use tracing::{debug, error};

use super::config::OpenAIRealtimeModel;
use super::token::EphemeralCredential;
use crate::core::realtime::base::{RealtimeError, RealtimeResult};

/// Exchanges a local session description for a remote one.
#[async_trait]
pub trait Signaling: Send + Sync {
    /// Send `offer_sdp` and return the answer SDP. Single attempt.
    async fn exchange(
        &self,
        offer_sdp: &str,
        credential: &EphemeralCredential,
    ) -> RealtimeResult<String>;
}

/// HTTP signaling client for the OpenAI realtime endpoint.
#[derive(Debug, Clone)]
pub struct SignalingClient {
    client: reqwest::Client,
    base_url: String,
    model: OpenAIRealtimeModel,
}

impl SignalingClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        model: OpenAIRealtimeModel,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model,
        }
    }

    /// Build the signaling URL with the model parameter.
    pub fn endpoint(&self) -> String {
        format!("{}?model={}", self.base_url, self.model.as_str())
    }
}

#[async_trait]
impl Signaling for SignalingClient {
    async fn exchange(
        &self,
        offer_sdp: &str,
        credential: &EphemeralCredential,
    ) -> RealtimeResult<String> {
        let url = self.endpoint();
        debug!(url = %url, offer_len = offer_sdp.len(), "Posting SDP offer");

        let response = self
            .client
            .post(&url)
            .bearer_auth(credential.expose())
            .header(CONTENT_TYPE, "application/sdp")
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| RealtimeError::Signaling(format!("signaling request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, body = %body, "Signaling endpoint rejected offer");
            return Err(RealtimeError::Signaling(format!(
                "signaling endpoint returned {status}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| RealtimeError::Signaling(format!("failed to read answer: {e}")))
    }
}
