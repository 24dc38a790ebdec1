use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3000
///
/// realtime:
///   model: "gpt-4o-realtime-preview-2024-12-17"
///   voice: "verse"
///   url: "https://api.openai.com/v1/realtime"
///   sessions_url: "https://api.openai.com/v1/realtime/sessions"
///   data_channel_label: "oai-events"
///   ice_servers:
///     - "stun:stun.l.google.com:19302"
///
/// session:
///   token_url: "http://localhost:3000/token"
///   suppression_delay_ms: 500
///   request_timeout_seconds: 30
///
/// providers:
///   openai_api_key: "sk-..."
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub session: Option<SessionYaml>,
    pub providers: Option<ProvidersYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Realtime engine configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub model: Option<String>,
    pub voice: Option<String>,
    /// Signaling endpoint
    pub url: Option<String>,
    /// Session-minting endpoint
    pub sessions_url: Option<String>,
    pub data_channel_label: Option<String>,
    pub ice_servers: Option<Vec<String>>,
}

/// Client session configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    /// Token broker the session fetches credentials from
    pub token_url: Option<String>,
    pub suppression_delay_ms: Option<u64>,
    pub request_timeout_seconds: Option<u64>,
}

/// Provider API keys from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersYaml {
    pub openai_api_key: Option<String>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
