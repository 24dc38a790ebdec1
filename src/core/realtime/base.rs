//! Base types shared by the realtime session engine.
//!
//! This module defines the error taxonomy, the session lifecycle states and
//! the handler aliases used by the event bus.
//!
//! # Error Taxonomy
//!
//! - `Credential` - the token endpoint failed or returned an unparseable body
//! - `MediaAccess` - the microphone could not be acquired
//! - `Signaling` - the remote signaling endpoint rejected the offer
//!
//! None of these are retried. They are logged locally and returned to the
//! caller of `start_session()`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::openai::messages::ServerEvent;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Fetching or parsing the ephemeral credential failed
    #[error("Credential error: {0}")]
    Credential(String),

    /// Microphone access was denied or unavailable
    #[error("Media access error: {0}")]
    MediaAccess(String),

    /// Signaling endpoint returned a non-success response
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Peer connection setup failed
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    /// Data channel failure
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Session lifecycle violation
    #[error("Session error: {0}")]
    SessionError(String),

    /// The session was stopped while it was still being established
    #[error("Session start cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<webrtc::Error> for RealtimeError {
    fn from(e: webrtc::Error) -> Self {
        RealtimeError::PeerConnection(e.to_string())
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(e: serde_json::Error) -> Self {
        RealtimeError::Serialization(e.to_string())
    }
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle state of a realtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session has been started, or the last start attempt failed
    #[default]
    Idle,
    /// Credential, offer and signaling are in flight, or the data channel
    /// has not opened yet
    Connecting,
    /// The data channel is open
    Active,
    /// The session was stopped after it started connecting
    Closed,
}

impl SessionState {
    /// Whether a new session may be started from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

// =============================================================================
// Handler Types
// =============================================================================

/// Synchronous handler invoked by the event bus for a recognized server event.
///
/// Handlers run inline on the task that delivers data-channel messages, so
/// they must not block.
pub type EventHandler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;
