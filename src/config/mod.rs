//! Configuration module for Walkman
//!
//! This module handles configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use walkman::config::WalkmanConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = WalkmanConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = WalkmanConfig::from_file(&config_path)?;
//!
//! println!("Token broker listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::PathBuf;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

/// Walkman configuration
///
/// Shared by both halves of the application:
/// - the token broker (`serve`): host, port, API key, model, voice, sessions URL
/// - the session client (`session`): token URL, signaling URL, data channel,
///   ICE servers, suppression delay
#[derive(Clone)]
pub struct WalkmanConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    /// Server-held key used to mint ephemeral credentials
    pub openai_api_key: Option<String>,

    // Realtime engine
    pub model: String,
    pub voice: String,
    pub sessions_url: String,
    pub realtime_url: String,
    pub data_channel_label: String,
    /// STUN/TURN server URLs
    pub ice_servers: Vec<String>,

    // Session client
    pub token_url: String,
    pub suppression_delay_ms: u64,
    pub request_timeout_seconds: u64,
}

/// Zeroize the API key when the configuration is dropped.
impl Drop for WalkmanConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
    }
}

impl fmt::Debug for WalkmanConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalkmanConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "***"),
            )
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("sessions_url", &self.sessions_url)
            .field("realtime_url", &self.realtime_url)
            .field("data_channel_label", &self.data_channel_label)
            .field("ice_servers", &self.ice_servers)
            .field("token_url", &self.token_url)
            .field("suppression_delay_ms", &self.suppression_delay_ms)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

impl WalkmanConfig {
    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // .env is loaded in main.rs, so it is already part of the environment here
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the merged configuration.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_model(&self.model)?;
        validation::validate_voice(&self.voice)?;
        validation::validate_url("REALTIME_URL", &self.realtime_url)?;
        validation::validate_url("REALTIME_SESSIONS_URL", &self.sessions_url)?;
        validation::validate_url("TOKEN_URL", &self.token_url)?;
        validation::validate_data_channel_label(&self.data_channel_label)?;
        validation::validate_request_timeout(self.request_timeout_seconds)?;
        Ok(())
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The API key for session minting.
    pub fn api_key(&self) -> Result<&str, String> {
        self.openai_api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| "OPENAI_API_KEY is not configured".to_string())
    }
}

impl Default for WalkmanConfig {
    fn default() -> Self {
        use crate::core::realtime::openai::{
            DEFAULT_DATA_CHANNEL_LABEL, DEFAULT_SUPPRESSION_DELAY_MS, OPENAI_REALTIME_SESSIONS_URL,
            OPENAI_REALTIME_URL, OpenAIRealtimeModel, OpenAIRealtimeVoice,
        };

        Self {
            host: env::DEFAULT_HOST.to_string(),
            port: env::DEFAULT_PORT,
            openai_api_key: None,
            model: OpenAIRealtimeModel::default().as_str().to_string(),
            voice: OpenAIRealtimeVoice::default().as_str().to_string(),
            sessions_url: OPENAI_REALTIME_SESSIONS_URL.to_string(),
            realtime_url: OPENAI_REALTIME_URL.to_string(),
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
            ice_servers: Vec::new(),
            token_url: env::DEFAULT_TOKEN_URL.to_string(),
            suppression_delay_ms: DEFAULT_SUPPRESSION_DELAY_MS,
            request_timeout_seconds: env::DEFAULT_REQUEST_TIMEOUT_SECONDS,
        }
    }
}
