//! Session state machine: which operations are legal, and how inbound
//! server events turn into client events.

use super::codec::ServerEvent;
use super::events::{ClientEvent, ErrorEvent, ErrorSource, MessageRole, RealtimeMessage, Speaker};
use crate::audio::types::AudioChunk;
use crate::error::{RealtimeError, SendError};

/// Logical session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Configuring,
    Active,
    Closing,
}

/// Coarse connection state exposed to applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl From<SessionPhase> for ConnectionState {
    fn from(phase: SessionPhase) -> Self {
        match phase {
            SessionPhase::Disconnected => Self::Disconnected,
            SessionPhase::Connecting => Self::Connecting,
            SessionPhase::Configuring | SessionPhase::Active => Self::Connected,
            SessionPhase::Closing => Self::Closing,
        }
    }
}

/// State of the one logical conversation a client holds.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    phase: SessionPhase,
    agent_speaking: bool,
    user_speaking: bool,
    instructions: String,
    session_id: Option<String>,
}

impl SessionMachine {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            phase: SessionPhase::Disconnected,
            agent_speaking: false,
            user_speaking: false,
            instructions: instructions.into(),
            session_id: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.phase.into()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.phase, SessionPhase::Configuring | SessionPhase::Active)
    }

    pub fn agent_speaking(&self) -> bool {
        self.agent_speaking
    }

    pub fn user_speaking(&self) -> bool {
        self.user_speaking
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// `Disconnected -> Connecting`. False when a session is already
    /// connecting or connected.
    pub fn begin_connect(&mut self) -> bool {
        if self.phase != SessionPhase::Disconnected {
            return false;
        }
        self.phase = SessionPhase::Connecting;
        true
    }

    /// Transport is open and the configuration frame is going out.
    pub fn transport_opened(&mut self) {
        self.phase = SessionPhase::Configuring;
    }

    /// Link dropped; a reconnect may follow.
    pub fn transport_lost(&mut self) {
        self.clear_speaking();
        self.phase = SessionPhase::Connecting;
    }

    pub fn begin_close(&mut self) {
        self.clear_speaking();
        self.phase = SessionPhase::Closing;
    }

    /// Back to `Disconnected`; instructions survive for the next connect.
    pub fn reset(&mut self) {
        self.clear_speaking();
        self.session_id = None;
        self.phase = SessionPhase::Disconnected;
    }

    /// Sends are legal only while `Active`.
    pub fn ensure_active(&self) -> Result<(), SendError> {
        match self.phase {
            SessionPhase::Active => Ok(()),
            SessionPhase::Disconnected => Err(SendError::NotConnected),
            other => Err(SendError::NotActive(other.to_string())),
        }
    }

    /// Store new instructions. Returns whether a configuration frame should
    /// be re-sent now.
    pub fn set_instructions(&mut self, instructions: impl Into<String>) -> bool {
        self.instructions = instructions.into();
        self.is_connected()
    }

    /// Apply one inbound event and return what subscribers should see.
    pub fn handle(&mut self, event: ServerEvent) -> Vec<ClientEvent> {
        match event {
            ServerEvent::SessionCreated { session_id } | ServerEvent::SessionUpdated { session_id } => {
                tracing::debug!(session_id = ?session_id, phase = %self.phase, "Session configured");
                if session_id.is_some() {
                    self.session_id = session_id;
                }
                if self.phase == SessionPhase::Configuring {
                    self.phase = SessionPhase::Active;
                }
                Vec::new()
            }
            ServerEvent::ItemCreated { role, text } => match (role.as_deref(), text) {
                (Some("assistant"), Some(text)) if !text.is_empty() => {
                    vec![ClientEvent::Message(RealtimeMessage::new(
                        MessageRole::Agent,
                        text,
                    ))]
                }
                (role, _) => {
                    tracing::trace!(role = ?role, "Conversation item without agent text");
                    Vec::new()
                }
            },
            ServerEvent::AudioDelta { samples } => {
                let mut events = Vec::with_capacity(2);
                if self.is_connected() && !self.agent_speaking {
                    self.agent_speaking = true;
                    events.push(ClientEvent::SpeakingStarted {
                        speaker: Speaker::Agent,
                    });
                }
                events.push(ClientEvent::AudioBuffer(AudioChunk::received(samples)));
                events
            }
            ServerEvent::AudioDone => {
                self.agent_speaking = false;
                vec![ClientEvent::SpeakingStopped {
                    speaker: Speaker::Agent,
                }]
            }
            ServerEvent::AudioTranscriptDone { transcript } => {
                transcript_message(MessageRole::Agent, transcript)
            }
            ServerEvent::InputTranscriptionCompleted { transcript } => {
                transcript_message(MessageRole::User, transcript)
            }
            ServerEvent::ResponseDone { status } => {
                tracing::debug!(status = ?status, "Response completed");
                Vec::new()
            }
            ServerEvent::SpeechStarted { .. } => {
                if self.is_connected() {
                    self.user_speaking = true;
                }
                vec![ClientEvent::SpeakingStarted {
                    speaker: Speaker::User,
                }]
            }
            ServerEvent::SpeechStopped { .. } => {
                self.user_speaking = false;
                vec![ClientEvent::SpeakingStopped {
                    speaker: Speaker::User,
                }]
            }
            ServerEvent::Error { payload } => {
                let error = RealtimeError::server(payload);
                tracing::error!(error = %error, "Realtime server reported an error");
                vec![ClientEvent::Error(ErrorEvent::from_server(error))]
            }
        }
    }

    fn clear_speaking(&mut self) {
        self.agent_speaking = false;
        self.user_speaking = false;
    }
}

fn transcript_message(role: MessageRole, transcript: String) -> Vec<ClientEvent> {
    if transcript.trim().is_empty() {
        return Vec::new();
    }
    vec![ClientEvent::Message(RealtimeMessage::new(role, transcript))]
}
