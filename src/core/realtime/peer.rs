//! Peer connection, data channel and local/remote media seams.
//!
//! The session engine talks to the peer connection through the traits in
//! this module so that lifecycle logic can be exercised without a network.
//! [`WebRtcConnector`] is the production implementation on top of the
//! `webrtc` crate.
//!
//! Data-channel activity (open, message, close) is delivered as a stream of
//! [`DataChannelEvent`]s in transport order. Outbound text is queued and
//! written by a dedicated task, so [`DataChannel::send`] never blocks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::base::{RealtimeError, RealtimeResult};

/// Local microphone track handed to the peer connection.
pub type MicrophoneTrack = Arc<TrackLocalStaticSample>;

/// Receiver side of a data channel's event stream.
pub type DataChannelEvents = mpsc::UnboundedReceiver<DataChannelEvent>;

// =============================================================================
// Data Channel
// =============================================================================

/// Ready state of a data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl From<RTCDataChannelState> for DataChannelState {
    fn from(state: RTCDataChannelState) -> Self {
        match state {
            RTCDataChannelState::Open => DataChannelState::Open,
            RTCDataChannelState::Closing => DataChannelState::Closing,
            RTCDataChannelState::Closed => DataChannelState::Closed,
            _ => DataChannelState::Connecting,
        }
    }
}

/// Something that happened on a data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataChannelEvent {
    Open,
    Message(String),
    Closed,
}

/// Outbound half of a data channel.
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn ready_state(&self) -> DataChannelState;

    /// Queue a text frame for transmission.
    fn send(&self, text: String) -> RealtimeResult<()>;
}

// =============================================================================
// Media
// =============================================================================

/// Identity of a remote media stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub stream_id: String,
    pub track_id: String,
    pub mime_type: String,
}

/// Playback target for the engine's spoken audio.
pub trait RemoteAudioSink: Send + Sync {
    /// Called once, for the first remote audio track.
    fn attach(&self, stream: &RemoteStream);

    /// Encoded payload of one RTP packet from the attached track.
    fn write(&self, payload: &[u8]);
}

/// Sink that only logs and counts what the engine sends.
#[derive(Debug, Default)]
pub struct LoggingAudioSink {
    bytes_received: AtomicU64,
}

impl LoggingAudioSink {
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }
}

impl RemoteAudioSink for LoggingAudioSink {
    fn attach(&self, stream: &RemoteStream) {
        info!(
            stream_id = %stream.stream_id,
            track_id = %stream.track_id,
            codec = %stream.mime_type,
            "Remote audio attached"
        );
    }

    fn write(&self, payload: &[u8]) {
        self.bytes_received
            .fetch_add(payload.len() as u64, Ordering::Relaxed);
    }
}

/// Codec of every local microphone track.
pub(crate) fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_owned(),
        clock_rate: 48000,
        channels: 2,
        ..Default::default()
    }
}

/// Grants access to the local microphone.
#[async_trait]
pub trait MicrophoneSource: Send + Sync {
    /// Acquire a microphone track. Fails with `RealtimeError::MediaAccess`
    /// when access is denied or no input is available.
    async fn acquire(&self) -> RealtimeResult<MicrophoneTrack>;
}

/// Microphone backed by a sample track the embedding application writes
/// Opus frames into. Used for headless sessions.
#[derive(Debug, Clone)]
pub struct StaticMicrophone {
    track_id: String,
    stream_id: String,
}

impl StaticMicrophone {
    pub fn new(track_id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            stream_id: stream_id.into(),
        }
    }
}

impl Default for StaticMicrophone {
    fn default() -> Self {
        Self::new("microphone", "walkman")
    }
}

#[async_trait]
impl MicrophoneSource for StaticMicrophone {
    async fn acquire(&self) -> RealtimeResult<MicrophoneTrack> {
        Ok(Arc::new(TrackLocalStaticSample::new(
            opus_capability(),
            self.track_id.clone(),
            self.stream_id.clone(),
        )))
    }
}

// =============================================================================
// Peer Connection
// =============================================================================

/// An established (not necessarily connected) peer connection.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Attach the local microphone track.
    async fn add_local_audio(&self, track: MicrophoneTrack) -> RealtimeResult<()>;

    /// Create a data channel and the stream of its events.
    async fn create_data_channel(
        &self,
        label: &str,
    ) -> RealtimeResult<(Arc<dyn DataChannel>, DataChannelEvents)>;

    /// Create an offer, apply it as the local description and return its SDP.
    async fn create_offer(&self) -> RealtimeResult<String>;

    /// Apply the remote answer SDP.
    async fn set_remote_answer(&self, sdp: String) -> RealtimeResult<()>;

    async fn close(&self) -> RealtimeResult<()>;
}

/// Creates peer connections.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a peer connection that routes the first remote audio track to
    /// `remote_audio`.
    async fn connect(
        &self,
        remote_audio: Arc<dyn RemoteAudioSink>,
    ) -> RealtimeResult<Arc<dyn PeerLink>>;
}

/// Peer connector backed by the `webrtc` crate.
#[derive(Debug, Clone, Default)]
pub struct WebRtcConnector {
    ice_servers: Vec<String>,
    include_loopback: bool,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self {
            ice_servers,
            include_loopback: false,
        }
    }

    /// Also gather loopback host candidates, for peers on the same machine.
    pub fn with_loopback_candidates(mut self, include: bool) -> Self {
        self.include_loopback = include;
        self
    }

    fn build_api(&self) -> RealtimeResult<API> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let mut settings = SettingEngine::default();
        settings.set_include_loopback_candidate(self.include_loopback);

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(settings)
            .build())
    }

    /// Create a peer connection that routes the first remote audio track to
    /// `remote_audio`.
    pub async fn open(&self, remote_audio: Arc<dyn RemoteAudioSink>) -> RealtimeResult<WebRtcPeer> {
        let api = self.build_api()?;

        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await?,
        );

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            info!(state = %state, "Peer connection state changed");
            Box::pin(async {})
        }));

        let attached = Arc::new(AtomicBool::new(false));
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let sink = remote_audio.clone();
            let attached = attached.clone();
            Box::pin(async move {
                if track.kind() != RTPCodecType::Audio {
                    return;
                }
                if attached.swap(true, Ordering::SeqCst) {
                    debug!(track_id = %track.id(), "Ignoring additional remote audio track");
                    return;
                }

                let stream = RemoteStream {
                    stream_id: track.stream_id(),
                    track_id: track.id(),
                    mime_type: track.codec().capability.mime_type,
                };
                sink.attach(&stream);

                tokio::spawn(async move {
                    while let Ok((packet, _)) = track.read_rtp().await {
                        sink.write(&packet.payload);
                    }
                    debug!(track_id = %stream.track_id, "Remote audio track ended");
                });
            })
        }));

        Ok(WebRtcPeer { inner: pc })
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(
        &self,
        remote_audio: Arc<dyn RemoteAudioSink>,
    ) -> RealtimeResult<Arc<dyn PeerLink>> {
        let peer: Arc<dyn PeerLink> = Arc::new(self.open(remote_audio).await?);
        Ok(peer)
    }
}

/// Wraps an `RTCPeerConnection`.
pub struct WebRtcPeer {
    inner: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerLink for WebRtcPeer {
    async fn add_local_audio(&self, track: MicrophoneTrack) -> RealtimeResult<()> {
        let rtp_sender = self
            .inner
            .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP must be drained for interceptors (NACK, reports) to run.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtp_sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
    ) -> RealtimeResult<(Arc<dyn DataChannel>, DataChannelEvents)> {
        let dc = self.inner.create_data_channel(label, None).await?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let open_tx = event_tx.clone();
        dc.on_open(Box::new(move || {
            let _ = open_tx.send(DataChannelEvent::Open);
            Box::pin(async {})
        }));

        let message_tx = event_tx.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let text = String::from_utf8_lossy(&msg.data).into_owned();
            let _ = message_tx.send(DataChannelEvent::Message(text));
            Box::pin(async {})
        }));

        dc.on_close(Box::new(move || {
            let _ = event_tx.send(DataChannelEvent::Closed);
            Box::pin(async {})
        }));

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let writer = dc.clone();
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = writer.send_text(text).await {
                    warn!("Failed to write to data channel: {}", e);
                }
            }
        });

        let channel: Arc<dyn DataChannel> = Arc::new(WebRtcDataChannel {
            label: label.to_string(),
            inner: dc,
            outbound: outbound_tx,
        });
        Ok((channel, event_rx))
    }

    async fn create_offer(&self) -> RealtimeResult<String> {
        let offer = self.inner.create_offer(None).await?;
        let mut gather_complete = self.inner.gathering_complete_promise().await;
        self.inner.set_local_description(offer).await?;

        // No trickle ICE over HTTP signaling: wait until every candidate is
        // in the local description.
        let _ = gather_complete.recv().await;

        self.inner
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| {
                RealtimeError::PeerConnection("local description missing after offer".to_string())
            })
    }

    async fn set_remote_answer(&self, sdp: String) -> RealtimeResult<()> {
        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| RealtimeError::Signaling(format!("invalid answer SDP: {e}")))?;
        self.inner.set_remote_description(answer).await?;
        Ok(())
    }

    async fn close(&self) -> RealtimeResult<()> {
        self.inner.close().await?;
        Ok(())
    }
}

struct WebRtcDataChannel {
    label: String,
    inner: Arc<RTCDataChannel>,
    outbound: mpsc::UnboundedSender<String>,
}

impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> DataChannelState {
        self.inner.ready_state().into()
    }

    fn send(&self, text: String) -> RealtimeResult<()> {
        self.outbound
            .send(text)
            .map_err(|_| RealtimeError::DataChannel("data channel writer stopped".to_string()))
    }
}
