use url::Url;

use crate::core::realtime::openai::{OpenAIRealtimeModel, OpenAIRealtimeVoice};

/// Validate that `value` is an absolute http(s) URL.
pub(crate) fn validate_url(name: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
    let url = Url::parse(value).map_err(|e| format!("Invalid {name} '{value}': {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(format!("Invalid {name} '{value}': unsupported scheme '{scheme}'").into()),
    }
}

/// Validate the model identifier.
pub(crate) fn validate_model(model: &str) -> Result<(), Box<dyn std::error::Error>> {
    if model.trim().is_empty() {
        return Err("Realtime model must not be empty".into());
    }
    if OpenAIRealtimeModel::parse(model).is_none() {
        return Err(format!("Unsupported realtime model '{model}'").into());
    }
    Ok(())
}

/// Validate the voice identifier.
pub(crate) fn validate_voice(voice: &str) -> Result<(), Box<dyn std::error::Error>> {
    if OpenAIRealtimeVoice::parse(voice).is_none() {
        return Err(format!("Unsupported realtime voice '{voice}'").into());
    }
    Ok(())
}

pub(crate) fn validate_request_timeout(seconds: u64) -> Result<(), Box<dyn std::error::Error>> {
    if seconds == 0 {
        return Err("REQUEST_TIMEOUT_SECONDS must be greater than zero".into());
    }
    Ok(())
}

pub(crate) fn validate_data_channel_label(label: &str) -> Result<(), Box<dyn std::error::Error>> {
    if label.trim().is_empty() {
        return Err("Data channel label must not be empty".into());
    }
    Ok(())
}
