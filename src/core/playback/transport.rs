//! Local audio transports.

use parking_lot::Mutex;
use tokio::time::Instant;

/// A local audio transport the playback controller drives.
///
/// Positions are in seconds. Implementations must be cheap to call; the
/// controller invokes them from data-channel handlers.
pub trait AudioTransport: Send + Sync {
    /// Current playback position.
    fn position(&self) -> f64;

    /// Move to `position`. Does not change the playing state.
    fn seek(&self, position: f64);

    fn play(&self);

    fn pause(&self);

    fn is_playing(&self) -> bool;
}

#[derive(Debug)]
struct ClockState {
    /// Position at the last play/pause/seek
    anchor: f64,
    /// When playback last (re)started, `None` while paused
    started_at: Option<Instant>,
}

/// Transport whose position advances with the tokio clock while playing.
///
/// Stands in for a real media element in headless sessions and tests.
#[derive(Debug)]
pub struct ClockTransport {
    state: Mutex<ClockState>,
}

impl ClockTransport {
    /// A paused transport at `position`.
    pub fn new(position: f64) -> Self {
        Self {
            state: Mutex::new(ClockState {
                anchor: position,
                started_at: None,
            }),
        }
    }

    /// A transport already playing from `position`.
    pub fn playing(position: f64) -> Self {
        Self {
            state: Mutex::new(ClockState {
                anchor: position,
                started_at: Some(Instant::now()),
            }),
        }
    }
}

impl Default for ClockTransport {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl ClockState {
    fn position(&self) -> f64 {
        match self.started_at {
            Some(started) => self.anchor + started.elapsed().as_secs_f64(),
            None => self.anchor,
        }
    }
}

impl AudioTransport for ClockTransport {
    fn position(&self) -> f64 {
        self.state.lock().position()
    }

    fn seek(&self, position: f64) {
        let mut state = self.state.lock();
        state.anchor = position;
        if state.started_at.is_some() {
            state.started_at = Some(Instant::now());
        }
    }

    fn play(&self) {
        let mut state = self.state.lock();
        if state.started_at.is_none() {
            state.started_at = Some(Instant::now());
        }
    }

    fn pause(&self) {
        let mut state = self.state.lock();
        if state.started_at.is_some() {
            state.anchor = state.position();
            state.started_at = None;
        }
    }

    fn is_playing(&self) -> bool {
        self.state.lock().started_at.is_some()
    }
}
