//! Data-channel message types for the OpenAI Realtime session.
//!
//! Every message is a JSON object discriminated by its `type` field and is
//! carried as a text frame over the `oai-events` data channel.
//!
//! # Protocol Overview
//!
//! Client events (sent to the engine):
//! - session.update - Register tools and the tool-choice policy
//! - response.create - Ask for a response (used to suppress narration)
//! - text - Free-form text message
//!
//! Server events (received from the engine) that the session reacts to:
//! - session.created - Session created
//! - response.done - Response complete, may carry function calls
//! - input_audio_buffer.speech_started - User started speaking
//! - output_audio_buffer.audio_stopped - Engine audio output finished
//!
//! Any other server event is kept in the event log but not dispatched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::config::SUPPRESSION_INSTRUCTIONS;

// =============================================================================
// Tool Schema
// =============================================================================

/// A tool the remote engine may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function name
    pub name: String,
    /// Human readable description shown to the model
    pub description: String,
    /// Parameter schema
    pub parameters: ToolParameters,
}

impl ToolDefinition {
    /// Create a function tool with an empty object schema.
    pub fn function(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            tool_type: "function".to_string(),
            name: name.into(),
            description: description.into(),
            parameters: ToolParameters::default(),
        }
    }

    /// Add a required string property.
    ///
    /// Arguments travel as strings and are parsed by the tool handler.
    pub fn with_required_string(
        mut self,
        property: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let property = property.into();
        self.parameters.properties.insert(
            property.clone(),
            ToolProperty {
                property_type: "string".to_string(),
                description: description.into(),
            },
        );
        self.parameters.required.push(property);
        self
    }
}

/// JSON schema of a tool's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub strict: bool,
    pub properties: BTreeMap<String, ToolProperty>,
    pub required: Vec<String>,
}

impl Default for ToolParameters {
    fn default() -> Self {
        Self {
            schema_type: "object".to_string(),
            strict: true,
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }
}

/// A single property of a tool's parameter schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolProperty {
    #[serde(rename = "type")]
    pub property_type: String,
    pub description: String,
}

// =============================================================================
// Session / Response Configuration
// =============================================================================

/// Session configuration carried by `session.update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Tool definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Response configuration carried by `response.create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Instructions for this response only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// =============================================================================
// Client Events (sent to the engine)
// =============================================================================

/// Client events sent over the data channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Response configuration
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },

    /// Plain text message
    #[serde(rename = "text")]
    Text {
        /// Message body
        text: String,
    },
}

impl ClientEvent {
    /// `session.update` registering `tools` with an "auto" tool choice.
    pub fn register_tools(tools: Vec<ToolDefinition>) -> Self {
        ClientEvent::SessionUpdate {
            session: SessionConfig {
                tools: Some(tools),
                tool_choice: Some("auto".to_string()),
                instructions: None,
            },
        }
    }

    /// `response.create` telling the engine not to narrate the tool call it
    /// just made.
    pub fn suppress_response() -> Self {
        ClientEvent::ResponseCreate {
            response: Some(ResponseConfig {
                instructions: Some(SUPPRESSION_INSTRUCTIONS.to_string()),
            }),
        }
    }

    /// Free-form `text` event.
    pub fn text(text: impl Into<String>) -> Self {
        ClientEvent::Text { text: text.into() }
    }

    /// Wire discriminator of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::ResponseCreate { .. } => "response.create",
            ClientEvent::Text { .. } => "text",
        }
    }
}

// =============================================================================
// Server Events (received from the engine)
// =============================================================================

/// An inbound event as it is kept in the event log.
///
/// The payload is the full JSON object, including the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealtimeEvent {
    /// Value of the `type` discriminator, empty when absent
    pub event_type: String,
    /// The complete event object
    pub payload: serde_json::Value,
}

impl RealtimeEvent {
    /// Parse a raw data-channel message.
    pub fn from_raw(raw: &str) -> Result<Self, serde_json::Error> {
        let payload: serde_json::Value = serde_json::from_str(raw)?;
        let event_type = payload
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            event_type,
            payload,
        })
    }
}

/// The server events the session dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEventKind {
    SessionCreated,
    ResponseDone,
    SpeechStarted,
    AudioStopped,
}

impl ServerEventKind {
    /// Wire discriminator of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionCreated => "session.created",
            Self::ResponseDone => "response.done",
            Self::SpeechStarted => "input_audio_buffer.speech_started",
            Self::AudioStopped => "output_audio_buffer.audio_stopped",
        }
    }
}

/// Typed view of the server events the session reacts to.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Option<SessionInfo>,
    },

    /// Response complete
    #[serde(rename = "response.done")]
    ResponseDone { response: ResponseInfo },

    /// Speech detected in the input audio buffer
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u64>,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Engine audio output finished playing
    #[serde(rename = "output_audio_buffer.audio_stopped")]
    AudioStopped {
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Any other event type
    #[serde(other)]
    Other,
}

impl ServerEvent {
    /// Kind of this event, `None` for events the session does not dispatch.
    pub fn kind(&self) -> Option<ServerEventKind> {
        match self {
            ServerEvent::SessionCreated { .. } => Some(ServerEventKind::SessionCreated),
            ServerEvent::ResponseDone { .. } => Some(ServerEventKind::ResponseDone),
            ServerEvent::SpeechStarted { .. } => Some(ServerEventKind::SpeechStarted),
            ServerEvent::AudioStopped { .. } => Some(ServerEventKind::AudioStopped),
            ServerEvent::Other => None,
        }
    }
}

/// Session information from `session.created`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Response body of `response.done`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Option<Vec<OutputItem>>,
}

impl ResponseInfo {
    /// Output entries of kind `function_call`, in order.
    pub fn function_calls(&self) -> impl Iterator<Item = &OutputItem> {
        self.output
            .iter()
            .flatten()
            .filter(|item| item.is_function_call())
    }
}

/// A single entry of `response.output`.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
}

impl OutputItem {
    pub fn is_function_call(&self) -> bool {
        self.item_type == "function_call"
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_tools_serialization() {
        let tool = ToolDefinition::function("play_pause", "Play or pause.")
            .with_required_string("PauseBool", "Pause is true, play is false");
        let json = serde_json::to_value(ClientEvent::register_tools(vec![tool])).unwrap();

        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["tool_choice"], "auto");
        assert!(json["session"].get("instructions").is_none());

        let tool = &json["session"]["tools"][0];
        assert_eq!(tool["type"], "function");
        assert_eq!(tool["name"], "play_pause");
        assert_eq!(tool["parameters"]["type"], "object");
        assert_eq!(tool["parameters"]["strict"], true);
        assert_eq!(
            tool["parameters"]["properties"]["PauseBool"]["type"],
            "string"
        );
        assert_eq!(tool["parameters"]["required"], json!(["PauseBool"]));
    }

    #[test]
    fn test_suppress_response_serialization() {
        let json = serde_json::to_value(ClientEvent::suppress_response()).unwrap();
        assert_eq!(
            json,
            json!({"type": "response.create", "response": {"instructions": "Do not respond."}})
        );
    }

    #[test]
    fn test_text_event_serialization() {
        let event = ClientEvent::text("skip ahead a bit");
        assert_eq!(event.event_type(), "text");
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json, json!({"type": "text", "text": "skip ahead a bit"}));
    }

    #[test]
    fn test_realtime_event_from_raw() {
        let event = RealtimeEvent::from_raw(r#"{"type":"session.created","event_id":"e1"}"#)
            .unwrap();
        assert_eq!(event.event_type, "session.created");
        assert_eq!(event.payload["event_id"], "e1");

        let untyped = RealtimeEvent::from_raw(r#"{"hello":"world"}"#).unwrap();
        assert_eq!(untyped.event_type, "");

        assert!(RealtimeEvent::from_raw("not json").is_err());
    }

    #[test]
    fn test_server_event_response_done() {
        let raw = json!({
            "type": "response.done",
            "response": {
                "id": "resp_1",
                "status": "completed",
                "output": [
                    {"type": "message", "id": "item_1"},
                    {
                        "type": "function_call",
                        "name": "play_pause",
                        "arguments": "{\"PauseBool\":\"true\"}",
                        "call_id": "call_1"
                    }
                ]
            }
        });
        let event: ServerEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.kind(), Some(ServerEventKind::ResponseDone));

        match event {
            ServerEvent::ResponseDone { response } => {
                let calls: Vec<_> = response.function_calls().collect();
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name.as_deref(), Some("play_pause"));
                assert_eq!(calls[0].call_id.as_deref(), Some("call_1"));
            }
            other => panic!("Expected ResponseDone, got {:?}", other),
        }
    }

    #[test]
    fn test_server_event_response_done_without_output() {
        let event: ServerEvent =
            serde_json::from_value(json!({"type": "response.done", "response": {"output": null}}))
                .unwrap();
        match event {
            ServerEvent::ResponseDone { response } => {
                assert_eq!(response.function_calls().count(), 0);
            }
            other => panic!("Expected ResponseDone, got {:?}", other),
        }
    }

    #[test]
    fn test_server_event_unknown_type() {
        let event: ServerEvent =
            serde_json::from_value(json!({"type": "response.audio.delta", "delta": "AAA="}))
                .unwrap();
        assert!(matches!(event, ServerEvent::Other));
        assert_eq!(event.kind(), None);
    }

    #[test]
    fn test_server_event_speech_events() {
        let started: ServerEvent = serde_json::from_value(json!({
            "type": "input_audio_buffer.speech_started",
            "audio_start_ms": 1200,
            "item_id": "item_9"
        }))
        .unwrap();
        assert_eq!(started.kind(), Some(ServerEventKind::SpeechStarted));

        let stopped: ServerEvent =
            serde_json::from_value(json!({"type": "output_audio_buffer.audio_stopped"})).unwrap();
        assert_eq!(stopped.kind(), Some(ServerEventKind::AudioStopped));
        assert_eq!(
            ServerEventKind::AudioStopped.as_str(),
            "output_audio_buffer.audio_stopped"
        );
    }
}
