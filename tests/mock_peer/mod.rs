//! In-memory peer connection for session tests.
//!
//! `MockConnector` hands out `MockPeer`s whose data channel is driven by the
//! test: open it, deliver server events, close it from the remote side, and
//! inspect what the session sent.

// Not every test file uses every helper
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use walkman::core::realtime::{
    DataChannel, DataChannelEvent, DataChannelEvents, DataChannelState, MicrophoneSource,
    MicrophoneTrack, PeerConnector, PeerLink, RealtimeError, RealtimeResult, RemoteAudioSink,
    StaticMicrophone,
};

pub const MOCK_OFFER: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=mock offer\r\n";

/// Data channel that records every frame written while open.
pub struct MockChannel {
    label: String,
    state: Mutex<DataChannelState>,
    sent: Mutex<Vec<String>>,
}

impl MockChannel {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            state: Mutex::new(DataChannelState::Connecting),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn set_state(&self, state: DataChannelState) {
        *self.state.lock() = state;
    }
}

impl DataChannel for MockChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> DataChannelState {
        *self.state.lock()
    }

    fn send(&self, text: String) -> RealtimeResult<()> {
        if *self.state.lock() != DataChannelState::Open {
            return Err(RealtimeError::DataChannel("channel not open".to_string()));
        }
        self.sent.lock().push(text);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockPeer {
    channel: Mutex<Option<Arc<MockChannel>>>,
    events: Mutex<Option<mpsc::UnboundedSender<DataChannelEvent>>>,
    closed: AtomicBool,
    has_local_audio: AtomicBool,
    remote_answer: Mutex<Option<String>>,
}

impl MockPeer {
    fn channel(&self) -> Arc<MockChannel> {
        self.channel
            .lock()
            .clone()
            .expect("data channel not created")
    }

    fn emit(&self, event: DataChannelEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Remote side opened the data channel.
    pub fn open(&self) {
        self.channel().set_state(DataChannelState::Open);
        self.emit(DataChannelEvent::Open);
    }

    pub fn deliver(&self, event: Value) {
        self.emit(DataChannelEvent::Message(event.to_string()));
    }

    pub fn deliver_raw(&self, raw: &str) {
        self.emit(DataChannelEvent::Message(raw.to_string()));
    }

    /// Remote side closed the data channel.
    pub fn remote_close(&self) {
        self.channel().set_state(DataChannelState::Closed);
        self.emit(DataChannelEvent::Closed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn has_local_audio(&self) -> bool {
        self.has_local_audio.load(Ordering::SeqCst)
    }

    pub fn remote_answer(&self) -> Option<String> {
        self.remote_answer.lock().clone()
    }

    pub fn channel_label(&self) -> Option<String> {
        self.channel.lock().as_ref().map(|c| c.label.clone())
    }

    /// Frames the session sent, parsed as JSON.
    pub fn sent(&self) -> Vec<Value> {
        self.channel()
            .sent
            .lock()
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|event| event["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl PeerLink for MockPeer {
    async fn add_local_audio(&self, _track: MicrophoneTrack) -> RealtimeResult<()> {
        self.has_local_audio.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
    ) -> RealtimeResult<(Arc<dyn DataChannel>, DataChannelEvents)> {
        let channel = Arc::new(MockChannel::new(label));
        let (tx, rx) = mpsc::unbounded_channel();
        *self.channel.lock() = Some(channel.clone());
        *self.events.lock() = Some(tx);
        let channel: Arc<dyn DataChannel> = channel;
        Ok((channel, rx))
    }

    async fn create_offer(&self) -> RealtimeResult<String> {
        Ok(MOCK_OFFER.to_string())
    }

    async fn set_remote_answer(&self, sdp: String) -> RealtimeResult<()> {
        *self.remote_answer.lock() = Some(sdp);
        Ok(())
    }

    async fn close(&self) -> RealtimeResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(channel) = self.channel.lock().as_ref() {
            channel.set_state(DataChannelState::Closed);
        }
        Ok(())
    }
}

/// Connector that records every peer it creates.
#[derive(Default)]
pub struct MockConnector {
    peers: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockConnector {
    pub fn peers(&self) -> Vec<Arc<MockPeer>> {
        self.peers.lock().clone()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn last(&self) -> Arc<MockPeer> {
        self.peers.lock().last().cloned().expect("no peer created")
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn connect(
        &self,
        _remote_audio: Arc<dyn RemoteAudioSink>,
    ) -> RealtimeResult<Arc<dyn PeerLink>> {
        let peer = Arc::new(MockPeer::default());
        self.peers.lock().push(peer.clone());
        Ok(peer)
    }
}

/// Microphone that can be told to refuse access.
pub struct MockMicrophone {
    deny: bool,
}

impl MockMicrophone {
    pub fn allowed() -> Arc<Self> {
        Arc::new(Self { deny: false })
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self { deny: true })
    }
}

#[async_trait]
impl MicrophoneSource for MockMicrophone {
    async fn acquire(&self) -> RealtimeResult<MicrophoneTrack> {
        if self.deny {
            return Err(RealtimeError::MediaAccess("permission denied".to_string()));
        }
        StaticMicrophone::default().acquire().await
    }
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
