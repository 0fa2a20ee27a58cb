//! Typed events and the listener registry.
//!
//! Listeners are plain synchronous closures keyed by [`EventKind`]. Emission
//! happens on the task that processes frames, so every event of one frame is
//! delivered before the next frame is read.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::base::{CloseInfo, LogEntry};
use super::messages::{ContentPart, ImagePayload, ToolCall, ToolCallCancellation, UiFeedback};

// =============================================================================
// Events
// =============================================================================

/// An event emitted by the live client.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// Socket opened and handshake sent
    Open,
    /// Socket closed
    Close(CloseInfo),
    /// Diagnostic entry
    Log(LogEntry),
    /// Decoded PCM audio from the model turn
    Audio(Bytes),
    /// Non-audio parts of a model turn, in arrival order
    Content(Vec<ContentPart>),
    /// Model output was cut off; buffered playback should stop
    Interrupted,
    SetupComplete,
    TurnComplete,
    ToolCall(ToolCall),
    ToolCallCancellation(ToolCallCancellation),
    Image(ImagePayload),
    Markdown(String),
    UiFeedback(UiFeedback),
}

/// Discriminant of a [`LiveEvent`], used to key listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Close,
    Log,
    Audio,
    Content,
    Interrupted,
    SetupComplete,
    TurnComplete,
    ToolCall,
    ToolCallCancellation,
    Image,
    Markdown,
    UiFeedback,
}

impl LiveEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LiveEvent::Open => EventKind::Open,
            LiveEvent::Close(_) => EventKind::Close,
            LiveEvent::Log(_) => EventKind::Log,
            LiveEvent::Audio(_) => EventKind::Audio,
            LiveEvent::Content(_) => EventKind::Content,
            LiveEvent::Interrupted => EventKind::Interrupted,
            LiveEvent::SetupComplete => EventKind::SetupComplete,
            LiveEvent::TurnComplete => EventKind::TurnComplete,
            LiveEvent::ToolCall(_) => EventKind::ToolCall,
            LiveEvent::ToolCallCancellation(_) => EventKind::ToolCallCancellation,
            LiveEvent::Image(_) => EventKind::Image,
            LiveEvent::Markdown(_) => EventKind::Markdown,
            LiveEvent::UiFeedback(_) => EventKind::UiFeedback,
        }
    }

    /// Shorthand for a log event.
    pub fn log(category: &str, payload: impl Into<serde_json::Value>) -> Self {
        LiveEvent::Log(LogEntry::new(category, payload))
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Handle returned by every registration, accepted by [`EventRegistry::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&LiveEvent) + Send + Sync>;

/// Registry of listeners keyed by event kind.
#[derive(Default)]
pub struct EventRegistry {
    listeners: RwLock<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
    subscribers: RwLock<Vec<(ListenerId, mpsc::UnboundedSender<LiveEvent>)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners: usize = self.listeners.read().values().map(Vec::len).sum();
        f.debug_struct("EventRegistry")
            .field("listeners", &listeners)
            .field("subscribers", &self.subscribers.read().len())
            .finish()
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a listener for every event of `kind`.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&LiveEvent) + Send + Sync + 'static,
    {
        let id = self.next_listener_id();
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener or subscription. Returns false if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut removed = false;
        for entries in self.listeners.write().values_mut() {
            let before = entries.len();
            entries.retain(|(lid, _)| *lid != id);
            removed |= entries.len() != before;
        }
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(lid, _)| *lid != id);
        removed || subscribers.len() != before
    }

    /// Forward every event to a channel.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LiveEvent> {
        self.subscribe_with_id().1
    }

    /// Like [`subscribe`](Self::subscribe), also returning the id for `off`.
    pub fn subscribe_with_id(&self) -> (ListenerId, mpsc::UnboundedReceiver<LiveEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_listener_id();
        self.subscribers.write().push((id, tx));
        (id, rx)
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    /// Deliver one event to its listeners, in registration order, then to
    /// channel subscribers.
    ///
    /// A panicking `log` listener is contained so it cannot prevent delivery of
    /// the domain events that follow.
    pub fn emit(&self, event: &LiveEvent) {
        let kind = event.kind();
        let snapshot: Vec<Listener> = self
            .listeners
            .read()
            .get(&kind)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in snapshot {
            if kind == EventKind::Log {
                if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                    tracing::error!("log listener panicked");
                }
            } else {
                listener(event);
            }
        }

        // Dropped receivers are pruned lazily
        let mut closed = false;
        for (_, tx) in self.subscribers.read().iter() {
            if tx.send(event.clone()).is_err() {
                closed = true;
            }
        }
        if closed {
            self.subscribers.write().retain(|(_, tx)| !tx.is_closed());
        }
    }

    pub fn emit_all(&self, events: &[LiveEvent]) {
        for event in events {
            self.emit(event);
        }
    }

    // =========================================================================
    // Typed registration
    // =========================================================================

    pub fn on_open<F>(&self, f: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::Open, move |_| f())
    }

    pub fn on_close<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&CloseInfo) + Send + Sync + 'static,
    {
        self.on(EventKind::Close, move |event| {
            if let LiveEvent::Close(info) = event {
                f(info)
            }
        })
    }

    pub fn on_log<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&LogEntry) + Send + Sync + 'static,
    {
        self.on(EventKind::Log, move |event| {
            if let LiveEvent::Log(entry) = event {
                f(entry)
            }
        })
    }

    pub fn on_audio<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&Bytes) + Send + Sync + 'static,
    {
        self.on(EventKind::Audio, move |event| {
            if let LiveEvent::Audio(data) = event {
                f(data)
            }
        })
    }

    pub fn on_content<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&[ContentPart]) + Send + Sync + 'static,
    {
        self.on(EventKind::Content, move |event| {
            if let LiveEvent::Content(parts) = event {
                f(parts)
            }
        })
    }

    pub fn on_interrupted<F>(&self, f: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::Interrupted, move |_| f())
    }

    pub fn on_setup_complete<F>(&self, f: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::SetupComplete, move |_| f())
    }

    pub fn on_turn_complete<F>(&self, f: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::TurnComplete, move |_| f())
    }

    pub fn on_tool_call<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&ToolCall) + Send + Sync + 'static,
    {
        self.on(EventKind::ToolCall, move |event| {
            if let LiveEvent::ToolCall(call) = event {
                f(call)
            }
        })
    }

    pub fn on_tool_call_cancellation<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&ToolCallCancellation) + Send + Sync + 'static,
    {
        self.on(EventKind::ToolCallCancellation, move |event| {
            if let LiveEvent::ToolCallCancellation(cancellation) = event {
                f(cancellation)
            }
        })
    }

    pub fn on_image<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&ImagePayload) + Send + Sync + 'static,
    {
        self.on(EventKind::Image, move |event| {
            if let LiveEvent::Image(image) = event {
                f(image)
            }
        })
    }

    pub fn on_markdown<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on(EventKind::Markdown, move |event| {
            if let LiveEvent::Markdown(text) = event {
                f(text)
            }
        })
    }

    pub fn on_ui_feedback<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&UiFeedback) + Send + Sync + 'static,
    {
        self.on(EventKind::UiFeedback, move |event| {
            if let LiveEvent::UiFeedback(feedback) = event {
                f(feedback)
            }
        })
    }
}
