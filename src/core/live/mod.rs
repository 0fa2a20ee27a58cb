//! Multimodal live session module.
//!
//! A client for a realtime session with a remote assistant that carries
//! interleaved audio, text, images, tool calls and control signals over one
//! WebSocket.
//!
//! # Architecture
//!
//! - `messages` decodes raw frames into one tagged [`IncomingMessage`] and
//!   builds the four outbound envelopes
//! - `dispatch` turns a decoded message into an ordered list of [`LiveEvent`]s
//! - `events` delivers those events to typed listeners and channels
//! - `client` owns the socket, the connection state machine and the senders
//! - `audio` defines the playback and capture collaborators
//!
//! # Audio Format
//!
//! - Model output: PCM 16-bit little-endian at 24kHz (`audio/pcm;rate=24000`)
//! - Microphone input: PCM 16-bit little-endian at 16kHz (`audio/pcm;rate=16000`)

pub mod audio;
mod base;
pub mod client;
pub mod dispatch;
pub mod events;
pub mod messages;

pub use audio::{AudioSink, AudioSource, AudioSourceEvent, attach_audio_sink, stream_audio_source};
pub use base::{
    CloseInfo, ConnectionState, LiveError, LiveResult, LogEntry, SessionIdentity, SocketId,
    close_error_detail, generate_run_id,
};
pub use client::LiveClient;
pub use dispatch::{classify_media, dispatch};
pub use events::{EventKind, EventRegistry, ListenerId, LiveEvent};
pub use messages::{
    ContentPart, DecodeError, Frame, FunctionCall, FunctionResponse, ImagePayload,
    IncomingMessage, InlineData, MediaChunk, OutgoingMessage, ServerContent, ToolCall,
    ToolCallCancellation, ToolResponse, TurnParts, UiFeedback, decode_frame,
};
