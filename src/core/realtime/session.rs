//! Session connection lifecycle.
//!
//! [`SessionConnection`] owns the peer connection and data channel of the
//! single active session and wires the event bus to the tool dispatcher and
//! the playback controller.
//!
//! # Lifecycle
//!
//! ```text
//! Idle/Closed --start_session--> Connecting --channel open--> Active
//!      ^                            |                           |
//!      |   (credential, media,      |                           |
//!      +--- signaling failure) -----+        stop_session       |
//!                                   +-------------+-------------+
//!                                                 v
//!                                              Closed
//! ```
//!
//! Every start takes a new generation number and `stop_session` bumps it.
//! A start that finds its generation stale after a suspension point gives
//! up with [`RealtimeError::Cancelled`]; data-channel events of a stale
//! generation are dropped.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::base::{RealtimeError, RealtimeResult, SessionState};
use super::device_audio::{CpalMicrophone, CpalSpeaker};
use super::event_bus::EventBus;
use super::openai::{
    DEFAULT_DATA_CHANNEL_LABEL, DEFAULT_SUPPRESSION_DELAY_MS, HttpTokenBroker,
    OpenAIRealtimeModel, RealtimeEvent, ServerEvent, ServerEventKind, Signaling, SignalingClient,
    TokenBroker,
};
use super::peer::{
    DataChannelEvent, DataChannelEvents, LoggingAudioSink, MicrophoneSource, PeerConnector,
    PeerLink, RemoteAudioSink, StaticMicrophone, WebRtcConnector,
};
use super::tools::{ToolCallOutput, ToolDispatcher, ToolRegistry};
use crate::config::WalkmanConfig;
use crate::core::playback::PlaybackController;

#[derive(Default)]
struct SessionResources {
    peer: Option<Arc<dyn PeerLink>>,
    pump: Option<JoinHandle<()>>,
}

struct SessionInner {
    token_broker: Arc<dyn TokenBroker>,
    signaling: Arc<dyn Signaling>,
    connector: Arc<dyn PeerConnector>,
    microphone: Arc<dyn MicrophoneSource>,
    remote_audio: Arc<dyn RemoteAudioSink>,
    data_channel_label: String,
    bus: Arc<EventBus>,
    dispatcher: Arc<ToolDispatcher>,
    playback: Arc<PlaybackController>,
    generation: AtomicU64,
    state: watch::Sender<SessionState>,
    resources: Mutex<SessionResources>,
}

/// Handle to the session connection. Clones share the same session.
#[derive(Clone)]
pub struct SessionConnection {
    inner: Arc<SessionInner>,
}

/// Builder for [`SessionConnection`].
pub struct SessionConnectionBuilder {
    token_broker: Arc<dyn TokenBroker>,
    signaling: Arc<dyn Signaling>,
    connector: Arc<dyn PeerConnector>,
    playback: Arc<PlaybackController>,
    microphone: Arc<dyn MicrophoneSource>,
    remote_audio: Arc<dyn RemoteAudioSink>,
    data_channel_label: String,
    suppression_delay: Duration,
    tools: Option<ToolRegistry>,
}

impl SessionConnectionBuilder {
    pub fn microphone(mut self, microphone: Arc<dyn MicrophoneSource>) -> Self {
        self.microphone = microphone;
        self
    }

    pub fn remote_audio(mut self, sink: Arc<dyn RemoteAudioSink>) -> Self {
        self.remote_audio = sink;
        self
    }

    pub fn data_channel_label(mut self, label: impl Into<String>) -> Self {
        self.data_channel_label = label.into();
        self
    }

    pub fn suppression_delay(mut self, delay: Duration) -> Self {
        self.suppression_delay = delay;
        self
    }

    /// Replace the default playback tools.
    pub fn tools(mut self, registry: ToolRegistry) -> Self {
        self.tools = Some(registry);
        self
    }

    pub fn build(self) -> SessionConnection {
        let bus = Arc::new(EventBus::new());
        let registry = self
            .tools
            .unwrap_or_else(|| ToolRegistry::with_playback_tools(self.playback.clone()));
        let dispatcher = Arc::new(
            ToolDispatcher::new(registry, bus.sender())
                .with_suppression_delay(self.suppression_delay),
        );

        let tools = dispatcher.clone();
        bus.subscribe(
            ServerEventKind::SessionCreated,
            Arc::new(move |event: &ServerEvent| {
                if let ServerEvent::SessionCreated { session } = event {
                    tools.on_session_created(session.as_ref());
                }
            }),
        );
        let tools = dispatcher.clone();
        bus.subscribe(
            ServerEventKind::ResponseDone,
            Arc::new(move |event: &ServerEvent| {
                if let ServerEvent::ResponseDone { response } = event {
                    tools.on_response_done(response);
                }
            }),
        );
        let playback = self.playback.clone();
        bus.subscribe(
            ServerEventKind::SpeechStarted,
            Arc::new(move |_: &ServerEvent| playback.on_speech_started()),
        );
        let playback = self.playback.clone();
        bus.subscribe(
            ServerEventKind::AudioStopped,
            Arc::new(move |_: &ServerEvent| playback.on_speech_stopped()),
        );

        let (state, _) = watch::channel(SessionState::Idle);

        SessionConnection {
            inner: Arc::new(SessionInner {
                token_broker: self.token_broker,
                signaling: self.signaling,
                connector: self.connector,
                microphone: self.microphone,
                remote_audio: self.remote_audio,
                data_channel_label: self.data_channel_label,
                bus,
                dispatcher,
                playback: self.playback,
                generation: AtomicU64::new(0),
                state,
                resources: Mutex::new(SessionResources::default()),
            }),
        }
    }
}

impl SessionConnection {
    pub fn builder(
        token_broker: Arc<dyn TokenBroker>,
        signaling: Arc<dyn Signaling>,
        connector: Arc<dyn PeerConnector>,
        playback: Arc<PlaybackController>,
    ) -> SessionConnectionBuilder {
        SessionConnectionBuilder {
            token_broker,
            signaling,
            connector,
            playback,
            microphone: Arc::new(StaticMicrophone::default()),
            remote_audio: Arc::new(LoggingAudioSink::default()),
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
            suppression_delay: Duration::from_millis(DEFAULT_SUPPRESSION_DELAY_MS),
            tools: None,
        }
    }

    /// Session wired to the HTTP token broker, the realtime signaling
    /// endpoint, a `webrtc` peer connection and the default audio devices.
    pub fn from_config(
        config: &WalkmanConfig,
        playback: Arc<PlaybackController>,
    ) -> RealtimeResult<Self> {
        Ok(Self::builder_from_config(config, playback)?.build())
    }

    /// Builder preloaded like [`from_config`](Self::from_config), for
    /// swapping out individual parts before building.
    pub fn builder_from_config(
        config: &WalkmanConfig,
        playback: Arc<PlaybackController>,
    ) -> RealtimeResult<SessionConnectionBuilder> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("HTTP client: {e}")))?;

        let model = OpenAIRealtimeModel::from_str_or_default(&config.model);
        let builder = Self::builder(
            Arc::new(HttpTokenBroker::new(client.clone(), config.token_url.clone())),
            Arc::new(SignalingClient::new(client, config.realtime_url.clone(), model)),
            Arc::new(WebRtcConnector::new(config.ice_servers.clone())),
            playback,
        )
        .microphone(Arc::new(CpalMicrophone::default()))
        .remote_audio(Arc::new(CpalSpeaker::default()))
        .data_channel_label(config.data_channel_label.clone())
        .suppression_delay(Duration::from_millis(config.suppression_delay_ms));
        Ok(builder)
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Watch lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    pub fn dispatcher(&self) -> &Arc<ToolDispatcher> {
        &self.inner.dispatcher
    }

    pub fn playback(&self) -> &Arc<PlaybackController> {
        &self.inner.playback
    }

    /// Logged events of the current session, newest first.
    pub fn events(&self) -> Vec<RealtimeEvent> {
        self.inner.bus.events()
    }

    pub fn last_tool_call(&self) -> Option<ToolCallOutput> {
        self.inner.dispatcher.last_tool_call()
    }

    /// Send a client event if the data channel is open.
    pub fn send_client_event<T: serde::Serialize + ?Sized>(&self, event: &T) -> bool {
        self.inner.bus.send_client_event(event)
    }

    pub fn send_text_message(&self, text: impl Into<String>) -> bool {
        self.inner.bus.send_text_message(text)
    }

    /// Establish a new session.
    ///
    /// Fetches a credential, acquires the microphone, creates the peer
    /// connection and data channel, and completes the offer/answer
    /// exchange. Returns once the answer is applied; the session becomes
    /// Active when the data channel opens.
    pub async fn start_session(&self) -> RealtimeResult<()> {
        let (generation, previous) = {
            let mut resources = self.inner.resources.lock();
            let state = self.state();
            if !state.can_start() {
                return Err(RealtimeError::SessionError(format!(
                    "cannot start a session while {state}"
                )));
            }

            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(pump) = resources.pump.take() {
                pump.abort();
            }
            self.inner.state.send_replace(SessionState::Connecting);
            (generation, resources.peer.take())
        };

        if let Some(peer) = previous {
            debug!(session = generation, "Closing peer left by a failed start");
            if let Err(e) = peer.close().await {
                warn!(session = generation, "Failed to close previous peer: {}", e);
            }
        }

        info!(session = generation, "Starting session");
        let result = self.establish(generation).await;

        if let Err(e) = &result {
            match e {
                RealtimeError::Cancelled => {
                    info!(session = generation, "Session start cancelled");
                }
                _ => {
                    error!(session = generation, "Failed to start session: {}", e);
                    let resources = self.inner.resources.lock();
                    if self.is_current(generation) {
                        self.inner.state.send_replace(SessionState::Idle);
                    }
                    drop(resources);
                }
            }
        }
        result
    }

    async fn establish(&self, generation: u64) -> RealtimeResult<()> {
        let inner = &self.inner;

        let credential = inner.token_broker.fetch_credential().await?;
        self.ensure_current(generation)?;

        let microphone = inner.microphone.acquire().await?;
        self.ensure_current(generation)?;

        let peer = inner.connector.connect(inner.remote_audio.clone()).await?;
        self.adopt_peer(generation, &peer).await?;

        peer.add_local_audio(microphone).await?;
        let (channel, events) = peer
            .create_data_channel(&inner.data_channel_label)
            .await?;
        {
            let _resources = inner.resources.lock();
            self.ensure_current(generation)?;
            inner.bus.attach(channel);
        }

        let offer = peer.create_offer().await?;
        self.ensure_current(generation)?;

        let answer = inner.signaling.exchange(&offer, &credential).await?;
        self.ensure_current(generation)?;

        peer.set_remote_answer(answer).await?;

        let mut resources = inner.resources.lock();
        self.ensure_current(generation)?;
        resources.pump = Some(tokio::spawn(pump_channel_events(
            Arc::downgrade(inner),
            generation,
            events,
        )));
        debug!(session = generation, "Remote answer applied, waiting for data channel");
        Ok(())
    }

    /// Keep `peer` as the session's peer, or close it if this start is
    /// already stale.
    async fn adopt_peer(&self, generation: u64, peer: &Arc<dyn PeerLink>) -> RealtimeResult<()> {
        {
            let mut resources = self.inner.resources.lock();
            if self.is_current(generation) {
                resources.peer = Some(peer.clone());
                return Ok(());
            }
        }
        if let Err(e) = peer.close().await {
            warn!(session = generation, "Failed to close stale peer: {}", e);
        }
        Err(RealtimeError::Cancelled)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) == generation
    }

    fn ensure_current(&self, generation: u64) -> RealtimeResult<()> {
        if self.is_current(generation) {
            Ok(())
        } else {
            Err(RealtimeError::Cancelled)
        }
    }

    /// Tear down the session. Safe to call at any time, any number of times.
    ///
    /// Closes the peer connection, forgets the data channel and resets the
    /// tool dispatcher. Local playback keeps its current state.
    pub async fn stop_session(&self) {
        let (generation, peer) = {
            let mut resources = self.inner.resources.lock();
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.inner.bus.detach();
            if let Some(pump) = resources.pump.take() {
                pump.abort();
            }
            (generation, resources.peer.take())
        };
        self.inner.dispatcher.end_session();

        if let Some(peer) = peer {
            if let Err(e) = peer.close().await {
                warn!(session = generation, "Failed to close peer connection: {}", e);
            }
        }

        let _resources = self.inner.resources.lock();
        if self.is_current(generation) {
            self.inner.state.send_if_modified(|state| {
                if matches!(state, SessionState::Connecting | SessionState::Active) {
                    *state = SessionState::Closed;
                    true
                } else {
                    false
                }
            });
        }
        info!(state = %self.state(), "Session stopped");
    }
}

impl SessionInner {
    fn on_channel_open(&self, generation: u64) {
        let _resources = self.resources.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        self.bus.reset_log();
        self.playback.reset_ducking();
        self.dispatcher.begin_session();
        self.state.send_replace(SessionState::Active);
        info!(session = generation, "Data channel open, session active");
    }

    async fn on_channel_closed(&self, generation: u64) {
        let peer = {
            let mut resources = self.resources.lock();
            if self.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            self.bus.detach();
            resources.pump.take();
            resources.peer.take()
        };
        self.dispatcher.end_session();

        if let Some(peer) = peer {
            if let Err(e) = peer.close().await {
                warn!(session = generation, "Failed to close peer connection: {}", e);
            }
        }

        let _resources = self.resources.lock();
        if self.generation.load(Ordering::SeqCst) == generation {
            self.state.send_if_modified(|state| {
                if matches!(state, SessionState::Connecting | SessionState::Active) {
                    *state = SessionState::Closed;
                    true
                } else {
                    false
                }
            });
        }
        info!(session = generation, "Data channel closed by remote");
    }
}

async fn pump_channel_events(
    inner: Weak<SessionInner>,
    generation: u64,
    mut events: DataChannelEvents,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.generation.load(Ordering::SeqCst) != generation {
            debug!(session = generation, "Dropping event of a stale session");
            break;
        }

        match event {
            DataChannelEvent::Open => inner.on_channel_open(generation),
            DataChannelEvent::Message(raw) => inner.bus.on_message(&raw),
            DataChannelEvent::Closed => {
                inner.on_channel_closed(generation).await;
                break;
            }
        }
    }
}
