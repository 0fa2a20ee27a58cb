//! Live session WebSocket message types.
//!
//! One JSON object is carried per frame. Inbound frames may arrive as text or
//! binary; binary frames are decoded as UTF-8 before the same discrimination
//! applies.
//!
//! # Protocol Overview
//!
//! Client messages (sent to server):
//! - `setup` - Handshake carrying run and user identifiers
//! - `realtimeInput` - Base64 media chunks (PCM audio, JPEG frames)
//! - `toolResponse` - Function responses for earlier tool calls
//! - `clientContent` - A user turn made of content parts
//!
//! Server messages (received from server), in discrimination priority:
//! - `toolCall` - Function calls requested by the model
//! - `image` - Image to display (`url`, optional `alt`)
//! - `ui_feedback` - Status indicator (`status`, `message`)
//! - `markdown` - Markdown as a string or `{content}`
//! - `functionResponses` - Legacy bare function responses
//! - `toolResponse` - Function responses, possibly carrying `markdown_content`
//! - `toolCallCancellation` - Cancelled tool call ids
//! - `setupComplete` - Handshake acknowledged
//! - `serverContent` - Interruption, turn completion and model turn parts

use base64::prelude::*;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::base::SessionIdentity;

/// Mime prefix identifying audio parts split out of a model turn.
pub const PCM_AUDIO_MIME_PREFIX: &str = "audio/pcm";

/// Mime type used for microphone chunks.
pub const MIC_AUDIO_MIME_TYPE: &str = "audio/pcm;rate=16000";

// =============================================================================
// Frames
// =============================================================================

/// A raw inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Frame::Text(text.to_string())
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text)
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Frame::Binary(data)
    }
}

/// Reasons a frame could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("binary frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("failed to parse JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

// =============================================================================
// Content Parts
// =============================================================================

/// A MIME type plus base64 payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineData {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Base64 encoded payload
    pub data: String,
    /// Any other fields, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Media chunk sent through `realtimeInput`.
pub type MediaChunk = InlineData;

impl InlineData {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
            extra: Map::new(),
        }
    }

    /// Encode raw bytes under the given mime type.
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(mime_type, BASE64_STANDARD.encode(bytes))
    }

    #[inline]
    pub fn is_pcm_audio(&self) -> bool {
        self.mime_type.starts_with(PCM_AUDIO_MIME_PREFIX)
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(&self.data)
    }
}

/// One part of a turn.
///
/// Sibling fields next to `text` or `inlineData` are kept in `extra`, and
/// parts that are neither are kept verbatim, so a part serializes back to
/// what was received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentPart {
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    Text {
        text: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    Other(Value),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text {
            text: text.into(),
            extra: Map::new(),
        }
    }

    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        ContentPart::InlineData {
            inline_data: InlineData::new(mime_type, data),
            extra: Map::new(),
        }
    }

    /// Text of a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    /// The inline data of this part when it carries PCM audio.
    pub fn pcm_audio(&self) -> Option<&InlineData> {
        match self {
            ContentPart::InlineData { inline_data, .. } if inline_data.is_pcm_audio() => {
                Some(inline_data)
            }
            _ => None,
        }
    }
}

/// Parts of one outbound user turn: a single part or an ordered sequence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TurnParts(pub Vec<ContentPart>);

impl From<ContentPart> for TurnParts {
    fn from(part: ContentPart) -> Self {
        TurnParts(vec![part])
    }
}

impl From<Vec<ContentPart>> for TurnParts {
    fn from(parts: Vec<ContentPart>) -> Self {
        TurnParts(parts)
    }
}

impl From<&str> for TurnParts {
    fn from(text: &str) -> Self {
        TurnParts(vec![ContentPart::text(text)])
    }
}

impl From<String> for TurnParts {
    fn from(text: String) -> Self {
        TurnParts(vec![ContentPart::text(text)])
    }
}

// =============================================================================
// Tool Calls
// =============================================================================

/// One function call requested by the model.
///
/// The id is echoed back in the matching response, so it keeps whatever JSON
/// type the server used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    /// JSON arguments
    #[serde(default)]
    pub args: Value,
}

/// A `toolCall` message body.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(rename = "functionCalls", default, deserialize_with = "lenient_seq")]
    pub function_calls: Vec<FunctionCall>,
}

/// A `toolCallCancellation` message body.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default, deserialize_with = "lenient_seq")]
    pub ids: Vec<Value>,
}

/// Response to one function call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_opt_string")]
    pub name: Option<String>,
    #[serde(default)]
    pub response: Value,
}

impl FunctionResponse {
    pub fn new(id: impl Into<String>, name: impl Into<String>, response: Value) -> Self {
        Self {
            id: Some(Value::String(id.into())),
            name: Some(name.into()),
            response,
        }
    }

    /// The `markdown_content` field of the response payload.
    ///
    /// Returns `None` when the field is absent, `Some("")` when it is present
    /// but not a string.
    pub fn markdown_content(&self) -> Option<&str> {
        markdown_content(&self.response)
    }
}

/// `markdown_content` of a raw response payload, with the same rules as
/// [`FunctionResponse::markdown_content`].
pub fn markdown_content(response: &Value) -> Option<&str> {
    response
        .get("markdown_content")
        .map(|v| v.as_str().unwrap_or(""))
}

/// A `toolResponse` message body.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolResponse {
    #[serde(rename = "functionResponses", default, deserialize_with = "lenient_seq")]
    pub function_responses: Vec<FunctionResponse>,
}

// =============================================================================
// Display Messages
// =============================================================================

/// An `image` message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_opt_string")]
    pub alt: Option<String>,
}

/// A `ui_feedback` message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiFeedback {
    pub status: String,
    #[serde(deserialize_with = "lenient_string")]
    pub message: String,
}

/// A `markdown` message body: a bare string or a lesson section.
///
/// Only `content` is required; the section index is whatever the server sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MarkdownPayload {
    Text(String),
    Section {
        content: String,
        #[serde(rename = "sectionIndex", default, skip_serializing_if = "Option::is_none")]
        section_index: Option<Value>,
    },
}

impl MarkdownPayload {
    pub fn into_text(self) -> String {
        match self {
            MarkdownPayload::Text(text) => text,
            MarkdownPayload::Section { content, .. } => content,
        }
    }
}

// =============================================================================
// Server Content
// =============================================================================

/// The model's ordered parts for the current turn.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelTurn {
    #[serde(default, deserialize_with = "lenient_seq")]
    pub parts: Vec<ContentPart>,
}

/// A `serverContent` message body.
///
/// Flags count only when they are JSON `true`. A malformed `modelTurn` is
/// treated as absent rather than hiding the flags.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_opt")]
    pub model_turn: Option<ModelTurn>,
}

impl ServerContent {
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        matches!(self.interrupted, Some(Value::Bool(true)))
    }

    #[inline]
    pub fn is_turn_complete(&self) -> bool {
        matches!(self.turn_complete, Some(Value::Bool(true)))
    }
}

// =============================================================================
// Incoming Messages
// =============================================================================

/// A decoded inbound frame. Exactly one variant matches per frame.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    ToolCall(ToolCall),
    Image(ImagePayload),
    UiFeedback(UiFeedback),
    Markdown(MarkdownPayload),
    /// Bare `{functionResponses: [...]}` shape, entries as received
    LegacyFunctionResponses(Vec<Value>),
    ToolResponse(ToolResponse),
    ToolCallCancellation(ToolCallCancellation),
    SetupComplete,
    ServerContent(ServerContent),
    /// Valid JSON that matched no known shape
    Unmatched(Value),
}

impl IncomingMessage {
    /// Discriminate a parsed JSON value.
    ///
    /// Shapes are tried in a fixed order and the first match wins. Fields a
    /// shape does not require are read leniently; a key missing a required
    /// field (`image.url`, `ui_feedback.status`, `markdown` content) does not
    /// match, so a later shape gets a chance.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(map) = &value else {
            return IncomingMessage::Unmatched(value);
        };

        if let Some(call) = field::<ToolCall>(map, "toolCall") {
            return IncomingMessage::ToolCall(call);
        }
        if let Some(image) = field::<ImagePayload>(map, "image") {
            return IncomingMessage::Image(image);
        }
        if let Some(feedback) = field::<UiFeedback>(map, "ui_feedback") {
            return IncomingMessage::UiFeedback(feedback);
        }
        if let Some(markdown) = field::<MarkdownPayload>(map, "markdown") {
            return IncomingMessage::Markdown(markdown);
        }
        if let Some(Value::Array(entries)) = map.get("functionResponses") {
            return IncomingMessage::LegacyFunctionResponses(entries.clone());
        }
        if let Some(response) = field::<ToolResponse>(map, "toolResponse") {
            return IncomingMessage::ToolResponse(response);
        }
        if let Some(cancellation) = field::<ToolCallCancellation>(map, "toolCallCancellation") {
            return IncomingMessage::ToolCallCancellation(cancellation);
        }
        if map.contains_key("setupComplete") {
            return IncomingMessage::SetupComplete;
        }
        if let Some(content) = field::<ServerContent>(map, "serverContent") {
            return IncomingMessage::ServerContent(content);
        }

        IncomingMessage::Unmatched(value)
    }
}

fn field<T: DeserializeOwned>(map: &Map<String, Value>, key: &str) -> Option<T> {
    map.get(key).and_then(|v| T::deserialize(v).ok())
}

/// Strings pass through; other values are rendered as JSON text, null as empty.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

/// Elements that do not fit `T` are skipped; a non-array yields nothing.
fn lenient_seq<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| T::deserialize(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_opt<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(T::deserialize(Value::deserialize(deserializer)?).ok())
}

/// Decode a raw frame into an [`IncomingMessage`].
pub fn decode_frame(frame: &Frame) -> Result<IncomingMessage, DecodeError> {
    let text = match frame {
        Frame::Text(text) => text.as_str(),
        Frame::Binary(data) => std::str::from_utf8(data)?,
    };
    let value: Value = serde_json::from_str(text)?;
    Ok(IncomingMessage::from_value(value))
}

// =============================================================================
// Outgoing Messages
// =============================================================================

/// Handshake body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupPayload {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// A `realtimeInput` message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeInput {
    #[serde(rename = "mediaChunks")]
    pub media_chunks: Vec<MediaChunk>,
}

/// One turn of conversation content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub parts: Vec<ContentPart>,
}

/// A `clientContent` message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientContent {
    pub turns: Vec<Turn>,
    #[serde(rename = "turnComplete")]
    pub turn_complete: bool,
}

/// Outbound envelope. Each value is written as one self-contained frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutgoingMessage {
    #[serde(rename = "setup")]
    Setup(SetupPayload),
    #[serde(rename = "realtimeInput")]
    RealtimeInput(RealtimeInput),
    #[serde(rename = "toolResponse")]
    ToolResponse(ToolResponse),
    #[serde(rename = "clientContent")]
    ClientContent(ClientContent),
}

impl OutgoingMessage {
    /// Handshake frame for the given identity.
    pub fn setup(identity: &SessionIdentity) -> Self {
        OutgoingMessage::Setup(SetupPayload {
            run_id: identity.run_id.clone(),
            user_id: identity.user_id.clone(),
        })
    }

    pub fn realtime_input(media_chunks: Vec<MediaChunk>) -> Self {
        OutgoingMessage::RealtimeInput(RealtimeInput { media_chunks })
    }

    pub fn tool_response(response: ToolResponse) -> Self {
        OutgoingMessage::ToolResponse(response)
    }

    /// Wrap parts as a single user turn.
    pub fn client_content(parts: impl Into<TurnParts>, turn_complete: bool) -> Self {
        OutgoingMessage::ClientContent(ClientContent {
            turns: vec![Turn {
                role: "user".to_string(),
                parts: parts.into().0,
            }],
            turn_complete,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
