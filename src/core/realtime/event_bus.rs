//! JSON event bus carried over the session's data channel.
//!
//! Outbound events are serialized and written only while the channel is
//! open; anything sent at another time is dropped without error. Inbound
//! messages are parsed, prepended to a newest-first log and dispatched to the
//! handlers subscribed to their [`ServerEventKind`].

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use super::base::{EventHandler, RealtimeError, RealtimeResult};
use super::openai::{ClientEvent, RealtimeEvent, ServerEvent, ServerEventKind};
use super::peer::{DataChannel, DataChannelState};

/// Observer that sees every logged event, recognized or not.
pub type EventTap = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

type ChannelSlot = Arc<RwLock<Option<Arc<dyn DataChannel>>>>;

/// Cloneable handle for writing client events to the current data channel.
#[derive(Clone, Default)]
pub struct EventSender {
    channel: ChannelSlot,
}

impl EventSender {
    /// Serialize `event` and transmit it if the channel is open.
    ///
    /// Returns whether the event was handed to the channel.
    pub fn send_client_event<T: Serialize + ?Sized>(&self, event: &T) -> bool {
        match self.try_send_client_event(event) {
            Ok(()) => true,
            Err(RealtimeError::DataChannel(reason)) => {
                debug!("Dropping client event: {}", reason);
                false
            }
            Err(e) => {
                warn!("Failed to send client event: {}", e);
                false
            }
        }
    }

    /// Like [`send_client_event`](Self::send_client_event), reporting why
    /// the event was not sent.
    pub fn try_send_client_event<T: Serialize + ?Sized>(&self, event: &T) -> RealtimeResult<()> {
        let channel = self
            .channel
            .read()
            .clone()
            .ok_or_else(|| RealtimeError::DataChannel("no data channel".to_string()))?;

        let state = channel.ready_state();
        if state != DataChannelState::Open {
            return Err(RealtimeError::DataChannel(format!(
                "data channel is {state:?}"
            )));
        }

        let json = serde_json::to_string(event)?;
        channel.send(json)
    }

    /// Send a free-form `text` event.
    pub fn send_text_message(&self, text: impl Into<String>) -> bool {
        self.send_client_event(&ClientEvent::text(text))
    }

    pub fn is_open(&self) -> bool {
        self.channel
            .read()
            .as_ref()
            .is_some_and(|channel| channel.ready_state() == DataChannelState::Open)
    }
}

/// Event bus for one session connection.
///
/// The log and the subscriptions survive reconnects; the log is cleared
/// when a data channel opens.
#[derive(Default)]
pub struct EventBus {
    sender: EventSender,
    log: Mutex<VecDeque<RealtimeEvent>>,
    handlers: RwLock<HashMap<ServerEventKind, Vec<EventHandler>>>,
    taps: RwLock<Vec<EventTap>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn attach(&self, channel: Arc<dyn DataChannel>) {
        debug!(label = channel.label(), "Attaching data channel");
        *self.sender.channel.write() = Some(channel);
    }

    pub fn detach(&self) {
        self.sender.channel.write().take();
    }

    /// Register a handler for one recognized server event kind.
    pub fn subscribe(&self, kind: ServerEventKind, handler: EventHandler) {
        self.handlers.write().entry(kind).or_default().push(handler);
    }

    /// Register an observer for every logged event.
    pub fn tap(&self, tap: EventTap) {
        self.taps.write().push(tap);
    }

    pub fn send_client_event<T: Serialize + ?Sized>(&self, event: &T) -> bool {
        self.sender.send_client_event(event)
    }

    pub fn send_text_message(&self, text: impl Into<String>) -> bool {
        self.sender.send_text_message(text)
    }

    /// Handle one inbound data-channel message.
    ///
    /// Messages that are not valid JSON are logged and skipped.
    pub fn on_message(&self, raw: &str) {
        let event = match RealtimeEvent::from_raw(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(len = raw.len(), "Skipping malformed inbound event: {}", e);
                return;
            }
        };
        debug!(event_type = %event.event_type, "Received server event");

        self.log.lock().push_front(event.clone());

        let taps = self.taps.read().clone();
        for tap in &taps {
            tap(&event);
        }

        let server_event = match serde_json::from_value::<ServerEvent>(event.payload) {
            Ok(server_event) => server_event,
            Err(e) => {
                warn!(event_type = %event.event_type, "Failed to decode server event: {}", e);
                return;
            }
        };

        let Some(kind) = server_event.kind() else {
            return;
        };

        let handlers = self.handlers.read().get(&kind).cloned().unwrap_or_default();
        for handler in &handlers {
            handler(&server_event);
        }
    }

    pub fn reset_log(&self) {
        self.log.lock().clear();
    }

    /// Logged events, newest first.
    pub fn events(&self) -> Vec<RealtimeEvent> {
        self.log.lock().iter().cloned().collect()
    }

    pub fn log_len(&self) -> usize {
        self.log.lock().len()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::core::realtime::base::{RealtimeError, RealtimeResult};

    /// In-memory data channel recording what was sent.
    pub struct RecordingChannel {
        state: Mutex<DataChannelState>,
        sent: Mutex<Vec<String>>,
    }

    impl RecordingChannel {
        pub fn new(state: DataChannelState) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(state),
                sent: Mutex::new(Vec::new()),
            })
        }

        pub fn set_state(&self, state: DataChannelState) {
            *self.state.lock() = state;
        }

        pub fn sent(&self) -> Vec<serde_json::Value> {
            self.sent
                .lock()
                .iter()
                .map(|raw| serde_json::from_str(raw).unwrap())
                .collect()
        }
    }

    impl DataChannel for RecordingChannel {
        fn label(&self) -> &str {
            "test"
        }

        fn ready_state(&self) -> DataChannelState {
            *self.state.lock()
        }

        fn send(&self, text: String) -> RealtimeResult<()> {
            if *self.state.lock() != DataChannelState::Open {
                return Err(RealtimeError::DataChannel("closed".to_string()));
            }
            self.sent.lock().push(text);
            Ok(())
        }
    }
}
