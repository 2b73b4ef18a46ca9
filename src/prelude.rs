//! Convenience re-exports for common use.

pub use crate::audio::{AudioChunk, AudioSink, AudioSource};
pub use crate::config::{RealtimeConfig, Voice};
pub use crate::error::{RealtimeError, Result, SendError};
pub use crate::realtime::{
    ClientEvent, ConnectionState, DisconnectReason, EventKind, MessageRole, RealtimeClient,
    RealtimeMessage, SessionPhase, Speaker,
};
