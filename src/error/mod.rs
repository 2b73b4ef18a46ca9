//! Error types for the realtime client.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Failure to establish the transport connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Authentication rejected: {0}")]
    Authentication(String),

    #[error("Handshake failed with status {status}: {message}")]
    Handshake { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Connect timed out after {0}ms")]
    Timeout(u64),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connect cancelled by disconnect")]
    Cancelled,
}

/// Failure to hand a frame to the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Transport is not connected")]
    NotConnected,

    #[error("Session is not active (phase: {0})")]
    NotActive(String),

    #[error("Frame encoding failed: {0}")]
    Encode(String),
}

/// Failure to interpret an inbound frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Frame has no string `type` field")]
    MissingType,

    #[error("Frame `{event_type}` is missing field `{field}`")]
    MissingField { event_type: String, field: String },

    #[error("Audio payload is invalid: {0}")]
    InvalidAudio(String),
}

/// Primary error type for all realtime client operations.
#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Server error ({code}): {message}")]
    Server {
        code: String,
        message: String,
        payload: serde_json::Value,
    },

    #[error("Reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Audio device error: {0}")]
    Audio(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RealtimeError {
    /// Build a server-reported error from the verbatim `error` payload.
    pub fn server(payload: serde_json::Value) -> Self {
        let code = payload
            .get("code")
            .or_else(|| payload.get("type"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let message = payload
            .get("message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("Realtime server error")
            .to_string();
        Self::Server {
            code,
            message,
            payload,
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connect(error) => error.category(),
            Self::Send(_) | Self::InvalidState(_) => ErrorCategory::State,
            Self::Decode(_) => ErrorCategory::Protocol,
            Self::Server { .. } => ErrorCategory::Server,
            Self::ReconnectExhausted { .. } => ErrorCategory::Network,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::Audio(_) => ErrorCategory::Device,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Io(_) => ErrorCategory::Network,
            Self::Serialization(_) => ErrorCategory::Serialization,
        }
    }

    /// Whether a new connection attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ReconnectExhausted { .. } => false,
            other => other.category().is_retryable(),
        }
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            Self::ReconnectExhausted { .. } => RecoverySuggestion::ReconnectManually,
            other => other.category().recovery_suggestion(),
        }
    }
}

impl ConnectError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::Handshake { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Protocol,
            },
            Self::Network(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::InvalidEndpoint(_) => ErrorCategory::Configuration,
            Self::Cancelled => ErrorCategory::State,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RealtimeError>;
