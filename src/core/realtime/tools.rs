//! Tool registration and function-call dispatch.
//!
//! Tools are registered with the remote engine once per session, on the
//! first `session.created`. Function calls arriving in `response.done` are
//! routed by name through a [`ToolRegistry`]; after a handler runs, a
//! delayed `response.create` asks the engine not to narrate the call.
//! Unknown tool names are ignored.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::event_bus::EventSender;
use super::openai::{
    ClientEvent, DEFAULT_SUPPRESSION_DELAY_MS, OutputItem, ResponseInfo, SessionInfo,
    ToolDefinition,
};
use crate::core::playback::PlaybackController;

/// Errors raised by tool handlers.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
}

/// A local capability the remote engine can call.
pub trait ToolHandler: Send + Sync {
    /// Schema advertised to the engine. The name is the dispatch key.
    fn definition(&self) -> ToolDefinition;

    /// Run the tool with the raw JSON argument string.
    fn invoke(&self, arguments: &str) -> Result<(), ToolError>;
}

/// Tools by name, in registration order.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ToolHandler>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the playback tools (`adjust_playback`, `play_pause`).
    pub fn with_playback_tools(playback: Arc<PlaybackController>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AdjustPlaybackTool::new(playback.clone())));
        registry.register(Arc::new(PlayPauseTool::new(playback)));
        registry
    }

    /// Add a tool. A tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: Arc<dyn ToolHandler>) {
        let name = tool.definition().name;
        match self.by_name.get(&name) {
            Some(&index) => self.tools[index] = tool,
            None => {
                self.by_name.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.by_name.get(name).map(|&index| &self.tools[index])
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|tool| tool.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// The most recent function call handled in the active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallOutput {
    pub call_id: Option<String>,
    pub name: String,
    pub arguments: String,
}

impl ToolCallOutput {
    fn from_item(item: &OutputItem, name: &str) -> Self {
        Self {
            call_id: item.call_id.clone(),
            name: name.to_string(),
            arguments: item.arguments.clone().unwrap_or_default(),
        }
    }
}

/// Routes engine function calls to local tools.
pub struct ToolDispatcher {
    registry: ToolRegistry,
    sender: EventSender,
    suppression_delay: Duration,
    tools_registered: AtomicBool,
    last_tool_call: Mutex<Option<ToolCallOutput>>,
    session_token: Mutex<CancellationToken>,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry, sender: EventSender) -> Self {
        Self {
            registry,
            sender,
            suppression_delay: Duration::from_millis(DEFAULT_SUPPRESSION_DELAY_MS),
            tools_registered: AtomicBool::new(false),
            last_tool_call: Mutex::new(None),
            session_token: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn with_suppression_delay(mut self, delay: Duration) -> Self {
        self.suppression_delay = delay;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Start tracking a new session. Pending suppressions of the previous
    /// one are cancelled.
    pub fn begin_session(&self) {
        let mut token = self.session_token.lock();
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Session became inactive: allow re-registration, forget the last
    /// tool call and cancel pending suppressions. Playback is untouched.
    pub fn end_session(&self) {
        self.tools_registered.store(false, Ordering::SeqCst);
        self.last_tool_call.lock().take();
        self.session_token.lock().cancel();
    }

    pub fn tools_registered(&self) -> bool {
        self.tools_registered.load(Ordering::SeqCst)
    }

    pub fn last_tool_call(&self) -> Option<ToolCallOutput> {
        self.last_tool_call.lock().clone()
    }

    /// Register tools on the first `session.created` of the session.
    ///
    /// The session only counts as registered once the `session.update` was
    /// handed to the data channel; a failed send is retried on the next
    /// `session.created`.
    pub fn on_session_created(&self, session: Option<&SessionInfo>) {
        if self.tools_registered() {
            debug!("Tools already registered for this session");
            return;
        }

        let definitions = self.registry.definitions();
        info!(
            count = definitions.len(),
            session_id = ?session.and_then(|s| s.id.as_deref()),
            model = ?session.and_then(|s| s.model.as_deref()),
            "Registering tools"
        );
        if self
            .sender
            .send_client_event(&ClientEvent::register_tools(definitions))
        {
            self.tools_registered.store(true, Ordering::SeqCst);
        } else {
            error!("Tool registration could not be sent, playback tools are unavailable");
        }
    }

    /// Run every recognized function call in a completed response.
    pub fn on_response_done(&self, response: &ResponseInfo) {
        debug!(
            response_id = ?response.id,
            status = ?response.status,
            "Response done"
        );
        for item in response.function_calls() {
            let Some(name) = item.name.as_deref() else {
                continue;
            };
            let Some(tool) = self.registry.get(name) else {
                debug!(tool = name, "Ignoring call to unknown tool");
                continue;
            };

            *self.last_tool_call.lock() = Some(ToolCallOutput::from_item(item, name));

            let arguments = item.arguments.as_deref().unwrap_or("{}");
            match tool.invoke(arguments) {
                Ok(()) => {
                    info!(tool = name, call_id = ?item.call_id, "Tool call handled");
                    self.schedule_suppression();
                }
                Err(e) => warn!(tool = name, "Tool call failed: {}", e),
            }
        }
    }

    fn schedule_suppression(&self) {
        let token = self.session_token.lock().clone();
        let sender = self.sender.clone();
        let delay = self.suppression_delay;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Suppression cancelled with session");
                }
                _ = tokio::time::sleep(delay) => {
                    sender.send_client_event(&ClientEvent::suppress_response());
                }
            }
        });
    }
}

// =============================================================================
// Playback Tools
// =============================================================================

fn parse_arguments<'a, T: Deserialize<'a>>(
    tool: &str,
    arguments: &'a str,
) -> Result<T, ToolError> {
    serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

/// Read the numeric prefix of `raw`, ignoring whatever follows it.
///
/// The engine sometimes phrases amounts as `"10 seconds"` or `"2.5s"`;
/// those read as 10 and 2.5. Returns `None` when `raw` does not start with
/// a number.
fn leading_number(raw: &str) -> Option<f64> {
    let s = raw.trim_start();
    let bytes = s.as_bytes();
    let digits_from = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let integer_end = digits_from(end);
    let mut digits = integer_end - end;
    end = integer_end;

    if bytes.get(end) == Some(&b'.') {
        let fraction_end = digits_from(end + 1);
        digits += fraction_end - (end + 1);
        end = fraction_end;
    }
    if digits == 0 {
        return None;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exponent = end + 1;
        if matches!(bytes.get(exponent), Some(b'+' | b'-')) {
            exponent += 1;
        }
        let exponent_end = digits_from(exponent);
        if exponent_end > exponent {
            end = exponent_end;
        }
    }

    s[..end].parse().ok()
}

#[derive(Debug, Deserialize)]
struct AdjustPlaybackArgs {
    #[serde(rename = "RewindBool")]
    rewind: String,
    #[serde(rename = "Seconds")]
    seconds: String,
}

/// `adjust_playback`: rewind or fast-forward by a number of seconds.
pub struct AdjustPlaybackTool {
    playback: Arc<PlaybackController>,
}

impl AdjustPlaybackTool {
    pub const NAME: &'static str = "adjust_playback";

    pub fn new(playback: Arc<PlaybackController>) -> Self {
        Self { playback }
    }
}

impl ToolHandler for AdjustPlaybackTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            Self::NAME,
            "Rewind or fast-forward in a podcast a number of seconds.",
        )
        .with_required_string("RewindBool", "Rewind is true, fast forward is false")
        .with_required_string("Seconds", "Number of Seconds")
    }

    fn invoke(&self, arguments: &str) -> Result<(), ToolError> {
        let args: AdjustPlaybackArgs = parse_arguments(Self::NAME, arguments)?;
        let seconds = leading_number(&args.seconds)
            .filter(|s| s.is_finite())
            .ok_or_else(|| ToolError::InvalidArguments {
                tool: Self::NAME.to_string(),
                reason: format!("Seconds is not a number: {:?}", args.seconds),
            })?;

        self.playback.adjust_playback(args.rewind == "true", seconds);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PlayPauseArgs {
    #[serde(rename = "PauseBool")]
    pause: String,
}

/// `play_pause`: pause or resume playback.
pub struct PlayPauseTool {
    playback: Arc<PlaybackController>,
}

impl PlayPauseTool {
    pub const NAME: &'static str = "play_pause";

    pub fn new(playback: Arc<PlaybackController>) -> Self {
        Self { playback }
    }
}

impl ToolHandler for PlayPauseTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(Self::NAME, "Play or pause.")
            .with_required_string("PauseBool", "Pause is true, play is false")
    }

    fn invoke(&self, arguments: &str) -> Result<(), ToolError> {
        let args: PlayPauseArgs = parse_arguments(Self::NAME, arguments)?;
        self.playback.set_pause(args.pause == "true");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::playback::ClockTransport;
    use crate::core::realtime::event_bus::EventBus;
    use crate::core::realtime::event_bus::test_support::RecordingChannel;
    use crate::core::realtime::peer::DataChannelState;
    use serde_json::json;

    struct Fixture {
        _bus: EventBus,
        channel: Arc<RecordingChannel>,
        playback: Arc<PlaybackController>,
        dispatcher: ToolDispatcher,
    }

    fn fixture(position: f64, playing: bool) -> Fixture {
        let bus = EventBus::new();
        let channel = RecordingChannel::new(DataChannelState::Open);
        bus.attach(channel.clone());

        let transport = if playing {
            ClockTransport::playing(position)
        } else {
            ClockTransport::new(position)
        };
        let playback = Arc::new(PlaybackController::new(Arc::new(transport)));
        let dispatcher = ToolDispatcher::new(
            ToolRegistry::with_playback_tools(playback.clone()),
            bus.sender(),
        );
        dispatcher.begin_session();

        Fixture {
            _bus: bus,
            channel,
            playback,
            dispatcher,
        }
    }

    fn response(output: serde_json::Value) -> ResponseInfo {
        serde_json::from_value(json!({ "output": output })).unwrap()
    }

    fn call(name: &str, arguments: &str) -> serde_json::Value {
        json!({"type": "function_call", "name": name, "arguments": arguments, "call_id": "call_1"})
    }

    #[test]
    fn test_registry_order_and_lookup() {
        let playback = Arc::new(PlaybackController::new(Arc::new(ClockTransport::default())));
        let registry = ToolRegistry::with_playback_tools(playback);
        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["adjust_playback", "play_pause"]);
        assert!(registry.get("play_pause").is_some());
        assert!(registry.get("volume").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_sent_once() {
        let f = fixture(0.0, false);
        f.dispatcher.on_session_created(None);
        f.dispatcher.on_session_created(None);
        f.dispatcher.on_session_created(None);

        let sent = f.channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "session.update");
        assert_eq!(sent[0]["session"]["tool_choice"], "auto");
        assert_eq!(sent[0]["session"]["tools"].as_array().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_session_rearms_registration() {
        let f = fixture(0.0, false);
        f.dispatcher.on_session_created(None);
        f.dispatcher.end_session();
        assert!(!f.dispatcher.tools_registered());
        f.dispatcher.begin_session();
        f.dispatcher.on_session_created(None);
        assert_eq!(f.channel.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_retried_after_failed_send() {
        let f = fixture(0.0, false);
        f.channel.set_state(DataChannelState::Connecting);
        f.dispatcher.on_session_created(None);
        assert!(!f.dispatcher.tools_registered());
        assert!(f.channel.sent().is_empty());

        f.channel.set_state(DataChannelState::Open);
        let session: SessionInfo =
            serde_json::from_value(json!({"id": "sess_1", "model": "gpt-4o-realtime"})).unwrap();
        f.dispatcher.on_session_created(Some(&session));
        assert!(f.dispatcher.tools_registered());
        assert_eq!(f.channel.sent()[0]["type"], "session.update");
    }

    #[tokio::test(start_paused = true)]
    async fn test_adjust_playback_call_then_suppression() {
        let f = fixture(30.0, false);
        f.dispatcher.on_response_done(&response(json!([
            {"type": "message"},
            call("adjust_playback", r#"{"RewindBool":"true","Seconds":"10"}"#)
        ])));

        assert_eq!(f.playback.state().position, 20.0);
        assert!(f.channel.sent().is_empty());

        let last = f.dispatcher.last_tool_call().unwrap();
        assert_eq!(last.name, "adjust_playback");
        assert_eq!(last.call_id.as_deref(), Some("call_1"));

        tokio::time::sleep(Duration::from_millis(DEFAULT_SUPPRESSION_DELAY_MS + 1)).await;
        assert_eq!(
            f.channel.sent(),
            vec![json!({"type": "response.create", "response": {"instructions": "Do not respond."}})]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_pause_call() {
        let f = fixture(0.0, true);
        f.dispatcher
            .on_response_done(&response(json!([call("play_pause", r#"{"PauseBool":"true"}"#)])));
        assert!(!f.playback.state().playing);

        f.dispatcher
            .on_response_done(&response(json!([call("play_pause", r#"{"PauseBool":"false"}"#)])));
        assert!(f.playback.state().playing);

        tokio::time::sleep(Duration::from_millis(DEFAULT_SUPPRESSION_DELAY_MS + 1)).await;
        assert_eq!(f.channel.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_tool_is_ignored() {
        let f = fixture(30.0, true);
        f.dispatcher
            .on_response_done(&response(json!([call("set_volume", r#"{"Level":"3"}"#)])));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(f.channel.sent().is_empty());
        assert!(f.dispatcher.last_tool_call().is_none());
        let state = f.playback.state();
        assert!(state.playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_arguments_skip_suppression() {
        let f = fixture(30.0, false);
        f.dispatcher.on_response_done(&response(json!([call(
            "adjust_playback",
            r#"{"RewindBool":"true","Seconds":"ten"}"#
        )])));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(f.playback.state().position, 30.0);
        assert!(f.channel.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_seconds_read_from_numeric_prefix() {
        let f = fixture(30.0, false);
        f.dispatcher.on_response_done(&response(json!([call(
            "adjust_playback",
            r#"{"RewindBool":"true","Seconds":"10 seconds"}"#
        )])));
        assert_eq!(f.playback.state().position, 20.0);

        f.dispatcher.on_response_done(&response(json!([call(
            "adjust_playback",
            r#"{"RewindBool":"false","Seconds":" 2.5e1s"}"#
        )])));
        assert_eq!(f.playback.state().position, 45.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_seconds_move_the_other_way() {
        let f = fixture(30.0, false);
        f.dispatcher.on_response_done(&response(json!([call(
            "adjust_playback",
            r#"{"RewindBool":"true","Seconds":"-5"}"#
        )])));
        assert_eq!(f.playback.state().position, 35.0);

        f.dispatcher.on_response_done(&response(json!([call(
            "adjust_playback",
            r#"{"RewindBool":"false","Seconds":"-60"}"#
        )])));
        assert_eq!(f.playback.state().position, 0.0);
    }

    #[test]
    fn test_leading_number() {
        assert_eq!(leading_number("10"), Some(10.0));
        assert_eq!(leading_number("  7.5 sec"), Some(7.5));
        assert_eq!(leading_number("-.5"), Some(-0.5));
        assert_eq!(leading_number("3e"), Some(3.0));
        assert_eq!(leading_number("1e2x"), Some(100.0));
        assert_eq!(leading_number("ten"), None);
        assert_eq!(leading_number("."), None);
        assert_eq!(leading_number("-"), None);
        assert_eq!(leading_number(""), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_session_cancels_pending_suppression() {
        let f = fixture(0.0, false);
        f.dispatcher
            .on_response_done(&response(json!([call("play_pause", r#"{"PauseBool":"false"}"#)])));
        f.dispatcher.end_session();
        assert!(f.dispatcher.last_tool_call().is_none());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(f.channel.sent().is_empty());
        // Stopping a session leaves playback running.
        assert!(f.playback.state().playing);
    }

    #[test]
    fn test_adjust_playback_schema() {
        let playback = Arc::new(PlaybackController::new(Arc::new(ClockTransport::default())));
        let definition = AdjustPlaybackTool::new(playback).definition();
        let json = serde_json::to_value(definition).unwrap();
        assert_eq!(json["parameters"]["required"], json!(["RewindBool", "Seconds"]));
        assert_eq!(
            json["parameters"]["properties"]["Seconds"]["description"],
            "Number of Seconds"
        );
    }
}
