//! Maps decoded messages to ordered events.
//!
//! [`dispatch`] is pure: it never touches the socket or the registry, so the
//! ordering rules can be checked without a connection. Every domain event is
//! followed by its diagnostic log entry.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use super::events::LiveEvent;
use super::messages::{
    ContentPart, FunctionResponse, IncomingMessage, MediaChunk, ServerContent, ToolResponse,
    markdown_content,
};

/// Convert one decoded message into the events it produces, in emission order.
pub fn dispatch(message: IncomingMessage) -> Vec<LiveEvent> {
    let mut events = Vec::new();

    match message {
        IncomingMessage::ToolCall(call) => {
            let payload = as_value(&call);
            events.push(LiveEvent::ToolCall(call));
            events.push(LiveEvent::log("server.toolCall", payload));
        }
        IncomingMessage::Image(image) => {
            let payload = as_value(&image);
            events.push(LiveEvent::Image(image));
            events.push(LiveEvent::log("server.image", payload));
        }
        IncomingMessage::UiFeedback(feedback) => {
            let payload = as_value(&feedback);
            events.push(LiveEvent::UiFeedback(feedback));
            events.push(LiveEvent::log("server.ui_feedback", payload));
        }
        IncomingMessage::Markdown(markdown) => {
            let text = markdown.into_text();
            events.push(LiveEvent::Markdown(text.clone()));
            events.push(LiveEvent::log("server.markdown", text));
        }
        IncomingMessage::LegacyFunctionResponses(responses) => {
            let joined = join_markdown(&responses);
            let payload = serde_json::json!({ "functionResponses": as_value(&responses) });
            events.push(LiveEvent::Markdown(joined));
            events.push(LiveEvent::log("server.toolResponse", payload));
        }
        IncomingMessage::ToolResponse(response) => dispatch_tool_response(&response, &mut events),
        IncomingMessage::ToolCallCancellation(cancellation) => {
            let payload = as_value(&cancellation);
            events.push(LiveEvent::ToolCallCancellation(cancellation));
            events.push(LiveEvent::log("receive.toolCallCancellation", payload));
        }
        IncomingMessage::SetupComplete => {
            events.push(LiveEvent::SetupComplete);
            events.push(LiveEvent::log("server.setupComplete", "setupComplete"));
        }
        IncomingMessage::ServerContent(content) => dispatch_server_content(content, &mut events),
        IncomingMessage::Unmatched(value) => {
            events.push(LiveEvent::log("receive.unmatched", value));
        }
    }

    events
}

/// Join `markdown_content` of the entries that carry the field.
fn join_markdown(entries: &[Value]) -> String {
    entries
        .iter()
        .filter_map(|entry| entry.get("response").and_then(markdown_content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn dispatch_tool_response(response: &ToolResponse, events: &mut Vec<LiveEvent>) {
    for content in response
        .function_responses
        .iter()
        .filter_map(FunctionResponse::markdown_content)
        .filter(|content| !content.is_empty())
    {
        events.push(LiveEvent::Markdown(content.to_string()));
        events.push(LiveEvent::log("server.markdown", content));
    }
    events.push(LiveEvent::log("server.toolResponse", as_value(response)));
}

fn dispatch_server_content(content: ServerContent, events: &mut Vec<LiveEvent>) {
    if content.is_interrupted() {
        events.push(LiveEvent::Interrupted);
        events.push(LiveEvent::log("receive.serverContent", "interrupted"));
        return;
    }

    if content.is_turn_complete() {
        events.push(LiveEvent::TurnComplete);
        events.push(LiveEvent::log("server.turnComplete", "turnComplete"));
    }

    let Some(model_turn) = content.model_turn else {
        return;
    };

    let (audio, other): (Vec<ContentPart>, Vec<ContentPart>) = model_turn
        .parts
        .into_iter()
        .partition(|part| part.pcm_audio().is_some());

    for inline in audio.iter().filter_map(ContentPart::pcm_audio) {
        if inline.data.is_empty() {
            continue;
        }
        match inline.decode() {
            Ok(pcm) => {
                let len = pcm.len();
                events.push(LiveEvent::Audio(Bytes::from(pcm)));
                events.push(LiveEvent::log("server.audio", format!("buffer ({len})")));
            }
            Err(e) => {
                tracing::warn!("Dropping undecodable audio part: {}", e);
                events.push(LiveEvent::log(
                    "server.error",
                    format!("Failed to decode audio part: {e}"),
                ));
            }
        }
    }

    if other.is_empty() {
        return;
    }

    let payload = as_value(&other);
    events.push(LiveEvent::Content(other));
    events.push(LiveEvent::log("server.content", payload));
}

/// Label a media batch for diagnostics: `audio`, `video`, `audio + video` or
/// `unknown`.
pub fn classify_media(chunks: &[MediaChunk]) -> &'static str {
    let has_audio = chunks.iter().any(|c| c.mime_type.contains("audio"));
    let has_video = chunks.iter().any(|c| c.mime_type.contains("image"));

    match (has_audio, has_video) {
        (true, true) => "audio + video",
        (true, false) => "audio",
        (false, true) => "video",
        (false, false) => "unknown",
    }
}

fn as_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
