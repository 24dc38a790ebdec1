use super::WalkmanConfig;
use super::yaml::YamlConfig;

/// Merge environment configuration (base) with YAML overrides.
///
/// Every value present in the YAML file replaces the environment value.
pub(crate) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<WalkmanConfig, Box<dyn std::error::Error>> {
    let mut config = WalkmanConfig::env_base()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
    }

    if let Some(realtime) = yaml.realtime {
        if let Some(model) = realtime.model {
            config.model = model;
        }
        if let Some(voice) = realtime.voice {
            config.voice = voice;
        }
        if let Some(url) = realtime.url {
            config.realtime_url = url;
        }
        if let Some(sessions_url) = realtime.sessions_url {
            config.sessions_url = sessions_url;
        }
        if let Some(label) = realtime.data_channel_label {
            config.data_channel_label = label;
        }
        if let Some(ice_servers) = realtime.ice_servers {
            config.ice_servers = ice_servers;
        }
    }

    if let Some(session) = yaml.session {
        if let Some(token_url) = session.token_url {
            config.token_url = token_url;
        }
        if let Some(delay) = session.suppression_delay_ms {
            config.suppression_delay_ms = delay;
        }
        if let Some(timeout) = session.request_timeout_seconds {
            config.request_timeout_seconds = timeout;
        }
    }

    if let Some(providers) = yaml.providers {
        if let Some(key) = providers.openai_api_key {
            config.openai_api_key = Some(key);
        }
    }

    Ok(config)
}
