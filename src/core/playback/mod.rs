//! Playback controller.
//!
//! A small state machine over an [`AudioTransport`]. Tool calls seek and
//! play/pause; speech activity from the remote engine ducks playback while
//! the user talks and restores it afterwards.
//!
//! Ducking remembers a single "was playing" flag. A second speech start
//! before the matching stop overwrites it with the already ducked state, so
//! overlapping speech segments do not nest.

mod transport;

pub use transport::{AudioTransport, ClockTransport};

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Snapshot of the controller and its transport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaybackState {
    pub playing: bool,
    pub ducked_from_playing: bool,
    pub position: f64,
}

/// Drives local playback in response to tool calls and speech activity.
pub struct PlaybackController {
    transport: Arc<dyn AudioTransport>,
    ducked_from_playing: Mutex<bool>,
}

impl PlaybackController {
    pub fn new(transport: Arc<dyn AudioTransport>) -> Self {
        Self {
            transport,
            ducked_from_playing: Mutex::new(false),
        }
    }

    pub fn transport(&self) -> &Arc<dyn AudioTransport> {
        &self.transport
    }

    /// Seek `seconds` backwards or forwards. Negative `seconds` move the
    /// other way; the target never goes below zero and is not capped above.
    pub fn adjust_playback(&self, rewind: bool, seconds: f64) {
        let current = self.transport.position();
        let delta = if rewind { -seconds } else { seconds };
        let target = (current + delta).max(0.0);
        debug!(rewind, seconds, from = current, to = target, "Adjusting playback");
        self.transport.seek(target);
    }

    pub fn set_pause(&self, pause: bool) {
        let mut ducked = self.ducked_from_playing.lock();
        if pause {
            self.transport.pause();
        } else {
            *ducked = false;
            self.transport.play();
        }
        debug!(pause, "Set pause");
    }

    pub fn on_speech_started(&self) {
        let mut ducked = self.ducked_from_playing.lock();
        let playing = self.transport.is_playing();
        *ducked = playing;
        if playing {
            self.transport.pause();
            debug!("Ducked playback for speech");
        }
    }

    pub fn on_speech_stopped(&self) {
        let mut ducked = self.ducked_from_playing.lock();
        if *ducked {
            *ducked = false;
            self.transport.play();
            debug!("Restored playback after speech");
        }
    }

    /// Forget any remembered pre-speech state. Called when a new data
    /// channel opens.
    pub fn reset_ducking(&self) {
        *self.ducked_from_playing.lock() = false;
    }

    pub fn state(&self) -> PlaybackState {
        let ducked = self.ducked_from_playing.lock();
        PlaybackState {
            playing: self.transport.is_playing(),
            ducked_from_playing: *ducked,
            position: self.transport.position(),
        }
    }
}
