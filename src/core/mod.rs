pub mod playback;
pub mod realtime;

// Re-export commonly used types for convenience
pub use playback::{AudioTransport, ClockTransport, PlaybackController, PlaybackState};

pub use realtime::{
    RealtimeError, RealtimeResult, SessionConnection, SessionState, ToolDispatcher, ToolRegistry,
};
