use std::env;

use super::WalkmanConfig;
use crate::core::realtime::openai::{
    DEFAULT_DATA_CHANNEL_LABEL, DEFAULT_SUPPRESSION_DELAY_MS, OPENAI_REALTIME_SESSIONS_URL,
    OPENAI_REALTIME_URL, OpenAIRealtimeModel, OpenAIRealtimeVoice,
};

pub(crate) const DEFAULT_HOST: &str = "0.0.0.0";
pub(crate) const DEFAULT_PORT: u16 = 3000;
pub(crate) const DEFAULT_TOKEN_URL: &str = "http://localhost:3000/token";
pub(crate) const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid {name} value '{raw}': {e}").into()),
        None => Ok(None),
    }
}

/// Split a comma separated list, dropping empty entries.
pub(crate) fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

impl WalkmanConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// `.env` is loaded into the environment by the binary before this runs.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Self::env_base()?;
        config.validate()?;
        Ok(config)
    }

    /// Environment values over defaults, without validation.
    pub(crate) fn env_base() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            host: var("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_var("PORT")?.unwrap_or(DEFAULT_PORT),
            openai_api_key: var("OPENAI_API_KEY"),
            model: var("REALTIME_MODEL")
                .unwrap_or_else(|| OpenAIRealtimeModel::default().as_str().to_string()),
            voice: var("REALTIME_VOICE")
                .unwrap_or_else(|| OpenAIRealtimeVoice::default().as_str().to_string()),
            sessions_url: var("REALTIME_SESSIONS_URL")
                .unwrap_or_else(|| OPENAI_REALTIME_SESSIONS_URL.to_string()),
            realtime_url: var("REALTIME_URL").unwrap_or_else(|| OPENAI_REALTIME_URL.to_string()),
            token_url: var("TOKEN_URL").unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
            data_channel_label: var("DATA_CHANNEL_LABEL")
                .unwrap_or_else(|| DEFAULT_DATA_CHANNEL_LABEL.to_string()),
            suppression_delay_ms: parse_var("SUPPRESSION_DELAY_MS")?
                .unwrap_or(DEFAULT_SUPPRESSION_DELAY_MS),
            ice_servers: var("ICE_SERVERS")
                .map(|raw| parse_list(&raw))
                .unwrap_or_default(),
            request_timeout_seconds: parse_var("REQUEST_TIMEOUT_SECONDS")?
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS),
        })
    }
}
