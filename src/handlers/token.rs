//! Token broker endpoint.
//!
//! `GET /token` mints an ephemeral credential for one realtime session and
//! returns the upstream body unchanged, e.g.
//! `{"client_secret": {"value": "ek_...", "expires_at": 1735000000}, ...}`.

use axum::Json;
use axum::extract::State;
use std::sync::Arc;
use tracing::{error, info};

use crate::core::realtime::openai::{
    OpenAIRealtimeModel, OpenAIRealtimeVoice, mint_session_token,
};
use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

const TOKEN_ERROR: &str = "Failed to generate token";

pub async fn generate_token(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<serde_json::Value>> {
    let config = &state.config;

    let api_key = config.api_key().map_err(|e| {
        error!("Token generation error: {}", e);
        AppError::Internal(TOKEN_ERROR.to_string())
    })?;

    let model = OpenAIRealtimeModel::from_str_or_default(&config.model);
    let voice = OpenAIRealtimeVoice::from_str_or_default(&config.voice);

    let body = mint_session_token(
        &state.http_client,
        &config.sessions_url,
        api_key,
        model,
        voice,
    )
    .await
    .map_err(|e| {
        error!("Token generation error: {}", e);
        AppError::Internal(TOKEN_ERROR.to_string())
    })?;

    info!(model = model.as_str(), voice = voice.as_str(), "Minted session token");
    Ok(Json(body))
}
