//! Base types for the multimodal live session client.
//!
//! This module holds the pieces every other part of the client agrees on:
//! the error taxonomy, the connection state machine, the session identity
//! embedded in the handshake, diagnostic log entries and close information.

use std::fmt;

use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during live session operations.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Transport failed before the socket reached the open state
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The setup frame could not be written after the socket opened
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// A frame was written while no socket is held
    #[error("WebSocket is not connected")]
    NotConnected,

    /// A pending connect was superseded by `disconnect()`
    #[error("Connect cancelled by disconnect")]
    ConnectCancelled,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type for live session operations.
pub type LiveResult<T> = Result<T, LiveError>;

impl From<serde_json::Error> for LiveError {
    fn from(e: serde_json::Error) -> Self {
        LiveError::SerializationError(e.to_string())
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of a live session.
///
/// `Closed` is not terminal: a later `connect()` moves the same client back
/// to `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection has been attempted yet
    #[default]
    Idle,
    /// Waiting for the socket to open
    Connecting,
    /// Socket open, handshake sent
    Open,
    /// Socket closed or connect failed
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Identifies one socket opened by `connect()`.
///
/// Used by `disconnect()` to avoid acting on a socket that a later
/// `connect()` already replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(pub(crate) u64);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket-{}", self.0)
    }
}

// =============================================================================
// Session Identity
// =============================================================================

/// Endpoint, run and user identifiers of a session.
///
/// The run id is generated once when none is supplied and only changes
/// through an explicit `connect(Some(run_id))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// WebSocket endpoint (`ws://` or `wss://`)
    pub endpoint: Url,
    /// Run identifier sent in the handshake
    pub run_id: String,
    /// User identifier sent in the handshake
    pub user_id: Option<String>,
}

impl SessionIdentity {
    /// Create an identity for `endpoint` with a freshly generated run id.
    pub fn new(endpoint: &str) -> LiveResult<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            LiveError::InvalidConfiguration(format!("invalid endpoint '{endpoint}': {e}"))
        })?;

        match endpoint.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(LiveError::InvalidConfiguration(format!(
                    "endpoint scheme must be ws or wss, got '{other}'"
                )));
            }
        }

        Ok(Self {
            endpoint,
            run_id: generate_run_id(),
            user_id: None,
        })
    }

    /// Set the user identifier.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Replace the generated run identifier.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }
}

/// Generate a collision-resistant run identifier.
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Diagnostics
// =============================================================================

/// Diagnostic log entry. Never affects protocol behaviour.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: OffsetDateTime,
    /// Category such as `client.open` or `server.audio`
    pub category: String,
    pub payload: Value,
}

impl LogEntry {
    pub fn new(category: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            category: category.into(),
            payload: payload.into(),
        }
    }
}

/// Entries compare by category and payload; the timestamp is ignored.
impl PartialEq for LogEntry {
    fn eq(&self, other: &Self) -> bool {
        self.category == other.category && self.payload == other.payload
    }
}

/// Marker preceding the error detail in a close reason.
const CLOSE_ERROR_PRELUDE: &str = "ERROR]";

/// Information carried by a `close` event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code, if the peer sent a close frame
    pub code: Option<u16>,
    /// Raw close reason
    pub reason: String,
    /// Text following `ERROR]` in the reason, if any
    pub error_detail: Option<String>,
    /// True when the close was requested through `disconnect()`
    pub initiated_by_client: bool,
}

impl CloseInfo {
    /// Close information for a close frame received from the peer.
    pub fn from_peer(code: Option<u16>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let error_detail = close_error_detail(&reason).map(str::to_owned);
        Self {
            code,
            reason,
            error_detail,
            initiated_by_client: false,
        }
    }

    /// Close information for a transport failure without a close frame.
    pub fn transport(error: impl fmt::Display) -> Self {
        Self {
            error_detail: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Close information for a normal client-initiated close.
    pub fn client() -> Self {
        Self {
            code: Some(1000),
            initiated_by_client: true,
            ..Default::default()
        }
    }
}

/// Extract the error detail from a close reason.
///
/// Only reasons mentioning "error" (any case) are inspected; the detail is the
/// text after the `ERROR]` marker with leading whitespace removed.
pub fn close_error_detail(reason: &str) -> Option<&str> {
    if !reason.to_lowercase().contains("error") {
        return None;
    }
    let index = reason.find(CLOSE_ERROR_PRELUDE)?;
    Some(reason[index + CLOSE_ERROR_PRELUDE.len()..].trim_start())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Idle.to_string(), "Idle");
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
        assert_eq!(ConnectionState::Open.to_string(), "Open");
        assert_eq!(ConnectionState::Closed.to_string(), "Closed");
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
    }

    #[test]
    fn test_error_display() {
        let err = LiveError::ConnectionFailed("boom".to_string());
        assert!(err.to_string().contains("Connection failed"));

        assert_eq!(LiveError::NotConnected.to_string(), "WebSocket is not connected");
    }

    #[test]
    fn test_identity_generates_run_id() {
        let a = SessionIdentity::new("ws://localhost:8000/ws").unwrap();
        let b = SessionIdentity::new("ws://localhost:8000/ws").unwrap();
        assert!(!a.run_id.is_empty());
        assert_ne!(a.run_id, b.run_id);
        assert!(a.user_id.is_none());
    }

    #[test]
    fn test_identity_builders() {
        let identity = SessionIdentity::new("wss://example.com/ws")
            .unwrap()
            .with_user_id("user-1")
            .with_run_id("run-1");
        assert_eq!(identity.user_id.as_deref(), Some("user-1"));
        assert_eq!(identity.run_id, "run-1");
        assert_eq!(identity.endpoint.as_str(), "wss://example.com/ws");
    }

    #[test]
    fn test_identity_rejects_bad_endpoint() {
        match SessionIdentity::new("not a url") {
            Err(LiveError::InvalidConfiguration(_)) => {}
            other => panic!("Expected InvalidConfiguration, got {other:?}"),
        }
        match SessionIdentity::new("http://example.com/ws") {
            Err(LiveError::InvalidConfiguration(msg)) => assert!(msg.contains("http")),
            other => panic!("Expected InvalidConfiguration, got {other:?}"),
        }
    }

    #[test]
    fn test_close_error_detail() {
        assert_eq!(
            close_error_detail("Internal ERROR] quota exceeded"),
            Some("quota exceeded")
        );
        assert_eq!(close_error_detail("[ERROR] first marker wins"), Some("first marker wins"));
        assert_eq!(close_error_detail("ERROR] at start"), Some("at start"));
        assert_eq!(close_error_detail("normal shutdown"), None);
        assert_eq!(close_error_detail("error without marker"), None);
    }

    #[test]
    fn test_close_info_from_peer() {
        let info = CloseInfo::from_peer(Some(1011), "Internal ERROR] backend crashed");
        assert_eq!(info.code, Some(1011));
        assert_eq!(info.reason, "Internal ERROR] backend crashed");
        assert_eq!(info.error_detail.as_deref(), Some("backend crashed"));
        assert!(!info.initiated_by_client);

        let info = CloseInfo::client();
        assert_eq!(info.code, Some(1000));
        assert!(info.initiated_by_client);
        assert!(info.error_detail.is_none());
    }

    #[test]
    fn test_log_entry_payload() {
        let entry = LogEntry::new("client.open", "connected to socket");
        assert_eq!(entry.category, "client.open");
        assert_eq!(entry.payload, Value::String("connected to socket".to_string()));
    }
}
