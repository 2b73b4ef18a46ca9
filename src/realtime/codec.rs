//! Wire codec: typed client frames out, typed server events in.
//!
//! All protocol knowledge lives here. Decoding never fails outright; frames
//! that cannot be understood come back as [`Decoded::Unrecognized`].

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use serde_json::Value;

use crate::audio::pcm;
use crate::config::{RealtimeConfig, TurnDetection, Voice};
use crate::error::DecodeError;

/// Outbound frames, serialized as `{"type": ..., ...}` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdate },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },

    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioCommit,

    #[serde(rename = "response.create")]
    ResponseCreate,

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionUpdate {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: Voice,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: InputAudioTranscription,
    pub turn_detection: ServerVad,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputAudioTranscription {
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerVad {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl From<&TurnDetection> for ServerVad {
    fn from(turn: &TurnDetection) -> Self {
        Self {
            kind: "server_vad".into(),
            threshold: turn.threshold,
            prefix_padding_ms: turn.prefix_padding_ms,
            silence_duration_ms: turn.silence_duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ClientFrame {
    /// Session configuration carrying the current instructions.
    pub fn session_update(config: &RealtimeConfig, instructions: &str) -> Self {
        let format = config.audio.format.as_str().to_string();
        Self::SessionUpdate {
            session: SessionUpdate {
                modalities: vec!["text".into(), "audio".into()],
                instructions: instructions.to_string(),
                voice: config.voice,
                input_audio_format: format.clone(),
                output_audio_format: format,
                input_audio_transcription: InputAudioTranscription {
                    model: config.transcription_model.clone(),
                },
                turn_detection: ServerVad::from(&config.turn_detection),
                temperature: config.temperature,
            },
        }
    }

    /// Append PCM16 samples (little-endian, base64 in the envelope).
    pub fn append_audio(samples: &[i16]) -> Self {
        Self::InputAudioAppend {
            audio: STANDARD.encode(pcm::to_le_bytes(samples)),
        }
    }

    /// A user text message.
    pub fn user_text(text: &str) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem {
                kind: "message".into(),
                role: "user".into(),
                content: vec![ContentPart {
                    kind: "input_text".into(),
                    text: text.to_string(),
                }],
            },
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::InputAudioAppend { .. } => "input_audio_buffer.append",
            Self::InputAudioCommit => "input_audio_buffer.commit",
            Self::ResponseCreate => "response.create",
            Self::ConversationItemCreate { .. } => "conversation.item.create",
        }
    }
}

/// Serialize a frame into its JSON envelope.
pub fn encode(frame: &ClientFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Inbound events the session understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SessionCreated { session_id: Option<String> },
    SessionUpdated { session_id: Option<String> },
    ItemCreated { role: Option<String>, text: Option<String> },
    AudioDelta { samples: Vec<i16> },
    AudioDone,
    AudioTranscriptDone { transcript: String },
    InputTranscriptionCompleted { transcript: String },
    ResponseDone { status: Option<String> },
    SpeechStarted { audio_start_ms: Option<u64> },
    SpeechStopped { audio_end_ms: Option<u64> },
    Error { payload: Value },
}

/// Why a frame was not turned into a [`ServerEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum Unrecognized {
    /// Well-formed envelope with a `type` this client does not handle.
    UnknownType(String),
    /// The frame could not be interpreted at all.
    Malformed(DecodeError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(ServerEvent),
    Unrecognized(Unrecognized),
}

impl Decoded {
    fn malformed(error: DecodeError) -> Self {
        Self::Unrecognized(Unrecognized::Malformed(error))
    }
}

/// Parse one inbound envelope.
pub fn decode(text: &str) -> Decoded {
    let payload = match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(error) => return Decoded::malformed(DecodeError::InvalidJson(error.to_string())),
    };
    let Some(event_type) = payload.get("type").and_then(Value::as_str) else {
        return Decoded::malformed(DecodeError::MissingType);
    };

    let event = match event_type {
        "session.created" => ServerEvent::SessionCreated {
            session_id: string_at(&payload, &["session", "id"]),
        },
        "session.updated" => ServerEvent::SessionUpdated {
            session_id: string_at(&payload, &["session", "id"]),
        },
        "conversation.item.created" => ServerEvent::ItemCreated {
            role: string_at(&payload, &["item", "role"]),
            text: first_content_text(&payload),
        },
        "response.audio.delta" => {
            let Some(delta) = string_field(&payload, "delta") else {
                return Decoded::malformed(missing(event_type, "delta"));
            };
            match decode_audio(&delta) {
                Ok(samples) => ServerEvent::AudioDelta { samples },
                Err(error) => return Decoded::malformed(error),
            }
        }
        "response.audio.done" => ServerEvent::AudioDone,
        "response.audio_transcript.done" => match string_field(&payload, "transcript") {
            Some(transcript) => ServerEvent::AudioTranscriptDone { transcript },
            None => return Decoded::malformed(missing(event_type, "transcript")),
        },
        "conversation.item.input_audio_transcription.completed" => {
            match string_field(&payload, "transcript") {
                Some(transcript) => ServerEvent::InputTranscriptionCompleted { transcript },
                None => return Decoded::malformed(missing(event_type, "transcript")),
            }
        }
        "response.done" => ServerEvent::ResponseDone {
            status: string_at(&payload, &["response", "status"]),
        },
        "input_audio_buffer.speech_started" => ServerEvent::SpeechStarted {
            audio_start_ms: payload.get("audio_start_ms").and_then(Value::as_u64),
        },
        "input_audio_buffer.speech_stopped" => ServerEvent::SpeechStopped {
            audio_end_ms: payload.get("audio_end_ms").and_then(Value::as_u64),
        },
        "error" => ServerEvent::Error {
            payload: payload.get("error").cloned().unwrap_or(Value::Null),
        },
        other => return Decoded::Unrecognized(Unrecognized::UnknownType(other.to_string())),
    };
    Decoded::Event(event)
}

fn decode_audio(delta: &str) -> Result<Vec<i16>, DecodeError> {
    let bytes = STANDARD
        .decode(delta)
        .map_err(|error| DecodeError::InvalidAudio(format!("invalid base64: {error}")))?;
    pcm::from_le_bytes(&bytes)
}

fn first_content_text(payload: &Value) -> Option<String> {
    let part = payload.get("item")?.get("content")?.get(0)?;
    part.get("text")
        .or_else(|| part.get("transcript"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn missing(event_type: &str, field: &str) -> DecodeError {
    DecodeError::MissingField {
        event_type: event_type.to_string(),
        field: field.to_string(),
    }
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    current.as_str().map(ToString::to_string)
}
