//! Realtime voice session engine.
//!
//! Connects to the OpenAI Realtime API over a WebRTC peer connection and
//! turns the engine's function calls and speech-activity events into local
//! playback control.
//!
//! # Architecture
//!
//! - [`SessionConnection`] drives connect/disconnect: credential from the
//!   token broker, microphone, peer connection, data channel, SDP exchange
//! - [`EventBus`] carries JSON events over the data channel and keeps a
//!   newest-first log of what the engine sent
//! - [`ToolDispatcher`] registers the tools once per session and routes
//!   `function_call` outputs to [`ToolHandler`]s
//! - [`PlaybackController`](crate::core::playback::PlaybackController)
//!   reacts to tool calls and ducks playback while the user speaks
//! - [`CpalMicrophone`] and [`CpalSpeaker`] carry the user's and the
//!   engine's voice between the audio devices and the peer connection
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use walkman::config::WalkmanConfig;
//! use walkman::core::playback::{ClockTransport, PlaybackController};
//! use walkman::core::realtime::SessionConnection;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = WalkmanConfig::from_env().unwrap();
//!     let playback = Arc::new(PlaybackController::new(Arc::new(ClockTransport::playing(0.0))));
//!
//!     let session = SessionConnection::from_config(&config, playback).unwrap();
//!     session.start_session().await.unwrap();
//!
//!     let mut state = session.subscribe_state();
//!     state.changed().await.unwrap();
//!     session.send_text_message("skip ahead thirty seconds");
//! }
//! ```

mod base;
mod device_audio;
mod event_bus;
pub mod openai;
mod peer;
mod session;
mod tools;

pub use base::{EventHandler, RealtimeError, RealtimeResult, SessionState};
pub use device_audio::{CpalMicrophone, CpalSpeaker, OPUS_FRAME_SAMPLES, OPUS_SAMPLE_RATE};
pub use event_bus::{EventBus, EventSender, EventTap};
pub use openai::{
    ClientEvent, EphemeralCredential, HttpTokenBroker, OpenAIRealtimeModel, OpenAIRealtimeVoice,
    RealtimeEvent, ServerEvent, ServerEventKind, Signaling, SignalingClient, TokenBroker,
    ToolDefinition,
};
pub use peer::{
    DataChannel, DataChannelEvent, DataChannelEvents, DataChannelState, LoggingAudioSink,
    MicrophoneSource, MicrophoneTrack, PeerConnector, PeerLink, RemoteAudioSink, RemoteStream,
    StaticMicrophone, WebRtcConnector, WebRtcPeer,
};
pub use session::{SessionConnection, SessionConnectionBuilder};
pub use tools::{
    AdjustPlaybackTool, PlayPauseTool, ToolCallOutput, ToolDispatcher, ToolError, ToolHandler,
    ToolRegistry,
};
