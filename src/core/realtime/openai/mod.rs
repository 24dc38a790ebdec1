//! OpenAI Realtime API over WebRTC.
//!
//! The session is established with an SDP offer/answer exchange over HTTP,
//! authenticated with an ephemeral credential, and events then flow as JSON
//! over a data channel.
//!
//! # Supported Models
//!
//! - `gpt-4o-realtime-preview` - GPT-4o Realtime Preview
//! - `gpt-4o-realtime-preview-2024-10-01` - October 2024 version
//! - `gpt-4o-realtime-preview-2024-12-17` - December 2024 version (default)
//! - `gpt-4o-mini-realtime-preview` - Mini model for lower latency
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, coral, echo, sage, shimmer, verse

mod config;
pub mod messages;
mod signaling;
mod token;

pub use config::{
    DEFAULT_DATA_CHANNEL_LABEL, DEFAULT_SUPPRESSION_DELAY_MS, OPENAI_REALTIME_SESSIONS_URL,
    OPENAI_REALTIME_URL, OpenAIRealtimeModel, OpenAIRealtimeVoice, SUPPRESSION_INSTRUCTIONS,
};
pub use messages::{
    ClientEvent, OutputItem, RealtimeEvent, ResponseConfig, ResponseInfo, ServerEvent,
    ServerEventKind, SessionConfig, SessionInfo, ToolDefinition, ToolParameters, ToolProperty,
};
pub use signaling::{Signaling, SignalingClient};
pub use token::{EphemeralCredential, HttpTokenBroker, TokenBroker, mint_session_token};
