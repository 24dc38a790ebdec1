//! OpenAI Realtime endpoint and session constants.
//!
//! - Model selection
//! - Voice selection
//! - Signaling, session-minting and data-channel identifiers

use serde::{Deserialize, Serialize};

/// Signaling endpoint. The local offer is POSTed here as `application/sdp`.
pub const OPENAI_REALTIME_URL: &str = "https://api.openai.com/v1/realtime";

/// Session-minting endpoint used by the token broker.
pub const OPENAI_REALTIME_SESSIONS_URL: &str = "https://api.openai.com/v1/realtime/sessions";

/// Label of the data channel that carries JSON events.
pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "oai-events";

/// Delay before the response-suppression event is sent after a tool call.
pub const DEFAULT_SUPPRESSION_DELAY_MS: u64 = 500;

/// Instructions carried by the response-suppression event.
pub const SUPPRESSION_INSTRUCTIONS: &str = "Do not respond.";

// =============================================================================
// Models
// =============================================================================

/// Supported OpenAI Realtime models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenAIRealtimeModel {
    /// GPT-4o Realtime Preview model
    #[serde(rename = "gpt-4o-realtime-preview")]
    Gpt4oRealtimePreview,
    /// GPT-4o Realtime Preview 2024-10-01
    #[serde(rename = "gpt-4o-realtime-preview-2024-10-01")]
    Gpt4oRealtimePreview20241001,
    /// GPT-4o Realtime Preview 2024-12-17
    #[default]
    #[serde(rename = "gpt-4o-realtime-preview-2024-12-17")]
    Gpt4oRealtimePreview20241217,
    /// GPT-4o Mini Realtime Preview
    #[serde(rename = "gpt-4o-mini-realtime-preview")]
    Gpt4oMiniRealtimePreview,
    /// GPT-4o Mini Realtime Preview 2024-12-17
    #[serde(rename = "gpt-4o-mini-realtime-preview-2024-12-17")]
    Gpt4oMiniRealtimePreview20241217,
}

impl OpenAIRealtimeModel {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt4oRealtimePreview => "gpt-4o-realtime-preview",
            Self::Gpt4oRealtimePreview20241001 => "gpt-4o-realtime-preview-2024-10-01",
            Self::Gpt4oRealtimePreview20241217 => "gpt-4o-realtime-preview-2024-12-17",
            Self::Gpt4oMiniRealtimePreview => "gpt-4o-mini-realtime-preview",
            Self::Gpt4oMiniRealtimePreview20241217 => "gpt-4o-mini-realtime-preview-2024-12-17",
        }
    }

    /// Parse a model identifier, returning `None` when it is not recognized.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "gpt-4o-realtime-preview" => Some(Self::Gpt4oRealtimePreview),
            "gpt-4o-realtime-preview-2024-10-01" => Some(Self::Gpt4oRealtimePreview20241001),
            "gpt-4o-realtime-preview-2024-12-17" => Some(Self::Gpt4oRealtimePreview20241217),
            "gpt-4o-mini-realtime-preview" => Some(Self::Gpt4oMiniRealtimePreview),
            "gpt-4o-mini-realtime-preview-2024-12-17" => {
                Some(Self::Gpt4oMiniRealtimePreview20241217)
            }
            _ => None,
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }
}

impl std::fmt::Display for OpenAIRealtimeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Voices
// =============================================================================

/// Available voices for the spoken side of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAIRealtimeVoice {
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    #[default]
    Verse,
}

impl OpenAIRealtimeVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse a voice name, returning `None` when it is not recognized.
    pub fn parse(s: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|v| v.as_str() == s.trim().to_lowercase())
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }

    /// Get all available voices.
    pub fn all() -> &'static [OpenAIRealtimeVoice] {
        &[
            Self::Alloy,
            Self::Ash,
            Self::Ballad,
            Self::Coral,
            Self::Echo,
            Self::Sage,
            Self::Shimmer,
            Self::Verse,
        ]
    }
}

impl std::fmt::Display for OpenAIRealtimeVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_as_str() {
        assert_eq!(
            OpenAIRealtimeModel::Gpt4oRealtimePreview20241217.as_str(),
            "gpt-4o-realtime-preview-2024-12-17"
        );
        assert_eq!(
            OpenAIRealtimeModel::Gpt4oMiniRealtimePreview.as_str(),
            "gpt-4o-mini-realtime-preview"
        );
    }

    #[test]
    fn test_model_parse() {
        assert_eq!(
            OpenAIRealtimeModel::parse("GPT-4o-Realtime-Preview"),
            Some(OpenAIRealtimeModel::Gpt4oRealtimePreview)
        );
        assert_eq!(OpenAIRealtimeModel::parse("whisper-1"), None);
        assert_eq!(
            OpenAIRealtimeModel::from_str_or_default("unknown"),
            OpenAIRealtimeModel::Gpt4oRealtimePreview20241217
        );
    }

    #[test]
    fn test_voice_parse() {
        assert_eq!(
            OpenAIRealtimeVoice::parse("SHIMMER"),
            Some(OpenAIRealtimeVoice::Shimmer)
        );
        assert_eq!(OpenAIRealtimeVoice::parse("nope"), None);
        assert_eq!(
            OpenAIRealtimeVoice::from_str_or_default("nope"),
            OpenAIRealtimeVoice::Verse
        );
    }

    #[test]
    fn test_voice_all() {
        let voices = OpenAIRealtimeVoice::all();
        assert_eq!(voices.len(), 8);
        assert!(voices.contains(&OpenAIRealtimeVoice::Alloy));
        assert!(voices.contains(&OpenAIRealtimeVoice::Verse));
    }

    #[test]
    fn test_endpoints() {
        assert!(OPENAI_REALTIME_SESSIONS_URL.starts_with(OPENAI_REALTIME_URL));
        assert_eq!(DEFAULT_DATA_CHANNEL_LABEL, "oai-events");
    }
}
