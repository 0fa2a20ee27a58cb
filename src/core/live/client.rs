//! Live session client.
//!
//! [`LiveClient`] owns at most one WebSocket at a time. Each open socket is
//! driven by a spawned task that writes queued frames, answers pings and feeds
//! inbound frames through [`decode_frame`] and [`dispatch`] before reading the
//! next one.
//!
//! # Example
//!
//! ```rust,ignore
//! use multimodal_live::core::live::{LiveClient, SessionIdentity};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let identity = SessionIdentity::new("ws://localhost:8000/ws")?.with_user_id("user-1");
//!     let client = LiveClient::new(identity);
//!
//!     client.events().on_markdown(|text| println!("{text}"));
//!     client.connect(None).await?;
//!     client.send_text("Hello")?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::base::{
    CloseInfo, ConnectionState, LiveError, LiveResult, LogEntry, SessionIdentity, SocketId,
};
use super::dispatch::{classify_media, dispatch};
use super::events::{EventRegistry, LiveEvent};
use super::messages::{Frame, MediaChunk, OutgoingMessage, ToolResponse, TurnParts, decode_frame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Work queued for the socket task.
#[derive(Debug)]
enum Outbound {
    Frame(String),
    Close,
}

#[derive(Debug)]
struct ActiveSocket {
    id: SocketId,
    sender: mpsc::UnboundedSender<Outbound>,
}

#[derive(Debug, Default)]
struct ConnectionSlot {
    state: ConnectionState,
    /// Bumped by every `connect()` and by a disconnect that cancels one
    generation: u64,
    next_socket: u64,
    socket: Option<ActiveSocket>,
}

#[derive(Debug)]
struct Inner {
    identity: RwLock<SessionIdentity>,
    conn: Mutex<ConnectionSlot>,
    events: EventRegistry,
}

// =============================================================================
// Live Client
// =============================================================================

/// Client for one multimodal live session.
///
/// Cloning yields another handle to the same session.
#[derive(Debug, Clone)]
pub struct LiveClient {
    inner: Arc<Inner>,
}

impl LiveClient {
    pub fn new(identity: SessionIdentity) -> Self {
        Self {
            inner: Arc::new(Inner {
                identity: RwLock::new(identity),
                conn: Mutex::new(ConnectionSlot::default()),
                events: EventRegistry::new(),
            }),
        }
    }

    /// Listener registry for this session.
    pub fn events(&self) -> &EventRegistry {
        &self.inner.events
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.conn.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.inner.conn.lock().socket.is_some()
    }

    /// Snapshot of the current identity.
    pub fn identity(&self) -> SessionIdentity {
        self.inner.identity.read().clone()
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Open a socket and send the handshake.
    ///
    /// Any open or pending socket is closed first. `run_id` replaces the
    /// session's run identifier before the handshake is built.
    pub async fn connect(&self, run_id: Option<String>) -> LiveResult<SocketId> {
        self.disconnect(None);

        if let Some(run_id) = run_id {
            self.inner.identity.write().run_id = run_id;
        }
        let identity = self.identity();
        let setup = serde_json::to_string(&OutgoingMessage::setup(&identity))?;

        let generation = {
            let mut conn = self.inner.conn.lock();
            conn.generation += 1;
            conn.state = ConnectionState::Connecting;
            conn.generation
        };

        self.inner.log(
            "client.connecting",
            json!({ "endpoint": identity.endpoint.as_str(), "run_id": identity.run_id }),
        );

        let ws_stream = match tokio_tungstenite::connect_async(identity.endpoint.as_str()).await {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                self.inner.abandon_connect(generation);
                let message = format!("Could not connect to \"{}\"", identity.endpoint);
                tracing::error!("{}: {}", message, e);
                self.inner.log("server.error", message.clone());
                return Err(LiveError::ConnectionFailed(format!("{message}: {e}")));
            }
        };

        let (mut ws_sink, ws_source) = ws_stream.split();

        if !self.inner.is_current(generation) {
            let _ = ws_sink.close().await;
            return Err(LiveError::ConnectCancelled);
        }

        // The handshake goes out before the sender is published, so it is
        // always the first frame on this socket.
        if let Err(e) = ws_sink.send(Message::Text(setup.into())).await {
            self.inner.abandon_connect(generation);
            tracing::error!("Failed to send setup frame: {}", e);
            self.inner
                .log("server.error", format!("Failed to send setup frame: {e}"));
            return Err(LiveError::HandshakeFailed(e.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let installed = {
            let mut conn = self.inner.conn.lock();
            if conn.generation != generation {
                None
            } else {
                conn.next_socket += 1;
                let id = SocketId(conn.next_socket);
                conn.socket = Some(ActiveSocket { id, sender: tx });
                conn.state = ConnectionState::Open;
                Some(id)
            }
        };

        let Some(socket_id) = installed else {
            let _ = ws_sink.close().await;
            return Err(LiveError::ConnectCancelled);
        };

        tracing::info!("Connected to live session at {}", identity.endpoint);
        self.inner.log("client.open", "connected to socket");
        self.inner.emit(LiveEvent::Open);

        tokio::spawn(run_socket(
            Arc::clone(&self.inner),
            socket_id,
            ws_sink,
            ws_source,
            rx,
        ));

        Ok(socket_id)
    }

    /// Close the held socket.
    ///
    /// With `Some(target)` nothing happens unless `target` is still the current
    /// socket. Returns false when there was nothing to close.
    pub fn disconnect(&self, target: Option<SocketId>) -> bool {
        let mut conn = self.inner.conn.lock();

        let held = conn.socket.as_ref().map(|s| s.id);
        match (held, target) {
            (Some(current), Some(target)) if current != target => return false,
            (Some(_), _) => {
                if let Some(socket) = conn.socket.take() {
                    let _ = socket.sender.send(Outbound::Close);
                }
                conn.state = ConnectionState::Closed;
                drop(conn);
                self.inner.log("client.close", "Disconnected");
                true
            }
            (None, None) if conn.state == ConnectionState::Connecting => {
                conn.generation += 1;
                conn.state = ConnectionState::Closed;
                drop(conn);
                self.inner.log("client.close", "Connect cancelled");
                true
            }
            (None, _) => false,
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Stream media chunks (PCM audio, JPEG frames) in one `realtimeInput` frame.
    pub fn send_realtime_input(&self, chunks: Vec<MediaChunk>) -> LiveResult<()> {
        let label = classify_media(&chunks);
        self.send_direct(&OutgoingMessage::realtime_input(chunks))?;
        self.inner.log("client.realtimeInput", label);
        Ok(())
    }

    /// Answer earlier tool calls.
    pub fn send_tool_response(&self, response: ToolResponse) -> LiveResult<()> {
        let message = OutgoingMessage::tool_response(response);
        self.send_direct(&message)?;
        self.inner.log("client.toolResponse", to_value(&message));
        Ok(())
    }

    /// Send content parts as one user turn.
    pub fn send(&self, parts: impl Into<TurnParts>, turn_complete: bool) -> LiveResult<()> {
        let message = OutgoingMessage::client_content(parts, turn_complete);
        self.send_direct(&message)?;
        self.inner.log("client.send", to_value(&message));
        Ok(())
    }

    /// Send a text turn and mark it complete.
    pub fn send_text(&self, text: &str) -> LiveResult<()> {
        self.send(text, true)
    }

    /// Serialize `request` and write it as one text frame.
    ///
    /// Every other sender goes through here. Fails with
    /// [`LiveError::NotConnected`] when no socket is held.
    pub fn send_direct<T: Serialize>(&self, request: &T) -> LiveResult<()> {
        let json = serde_json::to_string(request)?;
        let conn = self.inner.conn.lock();
        let socket = conn.socket.as_ref().ok_or(LiveError::NotConnected)?;
        socket
            .sender
            .send(Outbound::Frame(json))
            .map_err(|_| LiveError::NotConnected)
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Decode one inbound frame and emit its events.
    ///
    /// Malformed frames are logged and dropped.
    pub fn receive(&self, frame: Frame) {
        self.inner.receive(frame);
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.conn.lock().generation == generation
    }

    /// Mark a failed connect as closed unless a newer one took over.
    fn abandon_connect(&self, generation: u64) {
        let mut conn = self.conn.lock();
        if conn.generation == generation {
            conn.state = ConnectionState::Closed;
        }
    }

    fn emit(&self, event: LiveEvent) {
        if let LiveEvent::Log(entry) = &event {
            tracing::debug!(category = %entry.category, "{}", entry.payload);
        }
        self.events.emit(&event);
    }

    fn log(&self, category: &str, payload: impl Into<Value>) {
        self.emit(LiveEvent::Log(LogEntry::new(category, payload)));
    }

    fn receive(&self, frame: Frame) {
        let message = match decode_frame(&frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping malformed frame: {}", e);
                self.log("server.error", format!("Failed to parse frame: {e}"));
                return;
            }
        };

        for event in dispatch(message) {
            self.emit(event);
        }
    }

    fn handle_close(&self, id: SocketId, info: CloseInfo) {
        {
            let mut conn = self.conn.lock();
            if conn.socket.as_ref().is_some_and(|s| s.id == id) {
                conn.socket = None;
                conn.state = ConnectionState::Closed;
            }
        }

        if !info.initiated_by_client {
            let message = match (&info.error_detail, info.reason.is_empty()) {
                (Some(detail), _) => format!("disconnected with reason: {detail}"),
                (None, false) => format!("disconnected with reason: {}", info.reason),
                (None, true) => "disconnected".to_string(),
            };
            tracing::info!("Live session {} closed: {}", id, message);
            self.log("server.close", message);
        }

        self.emit(LiveEvent::Close(info));
    }
}

/// Drive one socket until either side closes it.
async fn run_socket(
    inner: Arc<Inner>,
    id: SocketId,
    mut ws_sink: WsSink,
    mut ws_source: WsSource,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    let info = loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(Outbound::Frame(json)) => {
                    if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                        tracing::error!("Failed to send WebSocket message: {}", e);
                        break CloseInfo::transport(e);
                    }
                }
                Some(Outbound::Close) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: String::new().into(),
                    };
                    if let Err(e) = ws_sink.send(Message::Close(Some(frame))).await {
                        tracing::debug!("Failed to send close frame: {}", e);
                    }
                    break CloseInfo::client();
                }
            },

            incoming = ws_source.next() => match incoming {
                Some(Ok(Message::Text(text))) => inner.receive(Frame::Text(text.as_str().to_owned())),
                Some(Ok(Message::Binary(data))) => inner.receive(Frame::Binary(data)),
                // tungstenite queues the pong itself and flushes it on the next read
                Some(Ok(Message::Ping(_))) => tracing::trace!("Received ping"),
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => CloseInfo::from_peer(Some(u16::from(frame.code)), frame.reason.as_str()),
                        None => CloseInfo::from_peer(None, ""),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("WebSocket error: {}", e);
                    break CloseInfo::transport(e);
                }
                None => break CloseInfo::transport("connection closed without a close frame"),
            },
        }
    };

    inner.handle_close(id, info);
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::live::events::EventKind;
    use crate::core::live::messages::ContentPart;

    fn client() -> LiveClient {
        LiveClient::new(SessionIdentity::new("ws://127.0.0.1:9/ws").unwrap())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<LiveEvent>) -> Vec<LiveEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_new_client_is_idle() {
        let client = client();
        assert_eq!(client.state(), ConnectionState::Idle);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_send_without_connection_fails() {
        let client = client();
        assert!(matches!(client.send_text("hi"), Err(LiveError::NotConnected)));
        assert!(matches!(
            client.send_realtime_input(vec![MediaChunk::new("audio/pcm", "x")]),
            Err(LiveError::NotConnected)
        ));
        assert!(matches!(
            client.send_tool_response(ToolResponse::default()),
            Err(LiveError::NotConnected)
        ));
    }

    #[test]
    fn test_failed_send_emits_no_log() {
        let client = client();
        let mut rx = client.events().subscribe();
        let _ = client.send(ContentPart::text("hi"), false);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_disconnect_when_idle_is_noop() {
        let client = client();
        let mut rx = client.events().subscribe();
        assert!(!client.disconnect(None));
        assert!(!client.disconnect(Some(SocketId(7))));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(client.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_receive_malformed_frame_is_contained() {
        let client = client();
        let mut rx = client.events().subscribe();

        client.receive(Frame::from("this is not json"));
        client.receive(Frame::Binary(bytes::Bytes::from_static(&[0xc3, 0x28])));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, LiveEvent::Log(entry) if entry.category == "server.error")));
    }

    #[test]
    fn test_receive_emits_dispatched_events_in_order() {
        let client = client();
        let mut rx = client.events().subscribe();

        client.receive(Frame::from(r#"{"setupComplete":{}}"#));
        client.receive(Frame::from(r#"{"markdown":"Hello"}"#));

        let kinds: Vec<EventKind> = drain(&mut rx).iter().map(LiveEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::SetupComplete,
                EventKind::Log,
                EventKind::Markdown,
                EventKind::Log,
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_failure_reports_endpoint() {
        let client = client();
        let mut rx = client.events().subscribe();

        match client.connect(None).await {
            Err(LiveError::ConnectionFailed(message)) => {
                assert!(message.contains("Could not connect to \"ws://127.0.0.1:9/ws\""));
            }
            other => panic!("Expected ConnectionFailed, got {other:?}"),
        }
        assert_eq!(client.state(), ConnectionState::Closed);

        let categories: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                LiveEvent::Log(entry) => Some(entry.category),
                _ => None,
            })
            .collect();
        assert_eq!(categories, vec!["client.connecting", "server.error"]);
    }

    #[tokio::test]
    async fn test_connect_override_replaces_run_id() {
        let client = client();
        let _ = client.connect(Some("run-override".to_string())).await;
        assert_eq!(client.identity().run_id, "run-override");
    }
}
