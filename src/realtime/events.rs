//! Events surfaced to the application, and the subscription table that
//! dispatches them.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter};
use tokio::sync::mpsc;

use crate::audio::types::AudioChunk;
use crate::error::RealtimeError;

/// Event categories a subscriber can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    SpeakingStarted,
    SpeakingStopped,
    Message,
    AudioBuffer,
}

/// Who is speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Agent,
}

/// Transcript author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

/// One immutable transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub role: MessageRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl RealtimeMessage {
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Why the session left the connected state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    Requested,
    /// The link dropped; `code`/`reason` come from the close.
    TransportLost { code: Option<u16>, reason: String },
    /// Reconnection stopped; no further automatic recovery.
    GaveUp { attempts: u32, reason: String },
}

/// Where an error event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorSource {
    Connect,
    Reconnect,
    Decode,
    Server,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub source: ErrorSource,
    /// Server error code (or type when no code was given).
    pub code: Option<String>,
    pub message: String,
    /// Server-provided payload, verbatim.
    pub payload: Option<Value>,
}

impl ErrorEvent {
    pub fn new(source: ErrorSource, message: impl Into<String>) -> Self {
        Self {
            source,
            code: None,
            message: message.into(),
            payload: None,
        }
    }

    /// Event for an error the server reported in-band.
    pub fn from_server(error: RealtimeError) -> Self {
        match error {
            RealtimeError::Server {
                code,
                message,
                payload,
            } => Self {
                source: ErrorSource::Server,
                code: Some(code),
                message,
                payload: Some(payload),
            },
            other => Self::new(ErrorSource::Server, other.to_string()),
        }
    }
}

/// Everything the client tells its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected {
        reconnected: bool,
    },
    Disconnected {
        reason: DisconnectReason,
        will_reconnect: bool,
    },
    Error(ErrorEvent),
    SpeakingStarted {
        speaker: Speaker,
    },
    SpeakingStopped {
        speaker: Speaker,
    },
    Message(RealtimeMessage),
    AudioBuffer(AudioChunk),
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected { .. } => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::Error(_) => EventKind::Error,
            Self::SpeakingStarted { .. } => EventKind::SpeakingStarted,
            Self::SpeakingStopped { .. } => EventKind::SpeakingStopped,
            Self::Message(_) => EventKind::Message,
            Self::AudioBuffer(_) => EventKind::AudioBuffer,
        }
    }

    /// A terminal disconnect: nothing will reconnect on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Disconnected {
                reason: DisconnectReason::GaveUp { .. },
                ..
            }
        )
    }
}

pub type EventHandler = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Token returned by [`EventBus::on`] for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Handlers keyed by event kind; several per kind. Channel subscribers
/// receive every kind and are dropped once their receiver goes away.
#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<EventKind, Vec<(SubscriptionId, EventHandler)>>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ClientEvent>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove one handler. Returns whether it was registered.
    pub fn off(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        before != list.len()
    }

    /// Forward every event kind into a channel. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|existing| !existing.is_closed());
        subscribers.push(tx);
        rx
    }

    #[cfg(test)]
    pub(crate) fn handler_count(&self, kind: EventKind) -> usize {
        let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        handlers.get(&kind).map_or(0, Vec::len)
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Run every handler for the event's kind, then forward to channel
    /// subscribers. A panicking handler is logged and the rest still run.
    pub fn emit(&self, event: &ClientEvent) {
        let kind = event.kind();
        let snapshot: Vec<EventHandler> = {
            let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
            handlers
                .get(&kind)
                .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
                .unwrap_or_default()
        };
        for handler in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(event = %kind, "Realtime event handler panicked");
            }
        }

        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
