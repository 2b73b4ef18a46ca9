//! Configuration system (layered: code > env > TOML file > defaults).

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

use crate::audio::types::AudioSettings;
use crate::error::{RealtimeError, Result};
use crate::realtime::reconnect::ReconnectPolicy;
use crate::realtime::transport::Endpoint;

pub const DEFAULT_BASE_URL: &str = "wss://api.openai.com/v1/realtime";
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful AI assistant.";

const ENV_API_KEY: &str = "OPENAI_API_KEY";
const ENV_BASE_URL: &str = "OPENAI_REALTIME_URL";
const ENV_MODEL: &str = "OPENAI_REALTIME_MODEL";
const ENV_VOICE: &str = "OPENAI_REALTIME_VOICE";

/// Voice the remote agent speaks with.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Voice {
    #[default]
    Alloy,
    Echo,
    Fable,
    Onyx,
    Nova,
    Shimmer,
}

/// Server-side voice activity detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnDetection {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

/// Configuration for one realtime client.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub voice: Voice,
    pub instructions: String,
    pub temperature: f32,
    pub transcription_model: String,
    pub turn_detection: TurnDetection,
    pub audio: AudioSettings,
    pub reconnect: ReconnectPolicy,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub heartbeat_interval: Duration,
}

impl fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| ".."))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("instructions", &self.instructions)
            .field("temperature", &self.temperature)
            .field("transcription_model", &self.transcription_model)
            .field("turn_detection", &self.turn_detection)
            .field("audio", &self.audio)
            .field("reconnect", &self.reconnect)
            .field("connect_timeout", &self.connect_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish()
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: Voice::default(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            temperature: 0.8,
            transcription_model: "whisper-1".to_string(),
            turn_detection: TurnDetection::default(),
            audio: AudioSettings::default(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl RealtimeConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source)
            .map_err(|error| RealtimeError::Configuration(format!("Invalid TOML config: {error}")))
    }

    /// Read a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    /// Load from environment variables on top of defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load an optional TOML file, then layer environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a key lookup (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(key) = lookup(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.model = model;
        }
        if let Some(voice) = lookup(ENV_VOICE) {
            match voice.parse() {
                Ok(parsed) => self.voice = parsed,
                Err(_) => tracing::warn!(voice = %voice, "Ignoring unknown realtime voice"),
            }
        }
    }

    /// Resolve the bearer credential; blank keys count as missing.
    pub fn resolve_api_key(&self) -> Result<String> {
        self.api_key
            .clone()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| RealtimeError::Authentication(format!("Missing {ENV_API_KEY}")))
    }

    /// Build the websocket endpoint (URL with model query plus credential).
    pub fn endpoint(&self) -> Result<Endpoint> {
        let api_key = self.resolve_api_key()?;
        let trimmed = self.base_url.trim();
        if trimmed.is_empty() {
            return Err(RealtimeError::Configuration(
                "Realtime base URL cannot be empty".into(),
            ));
        }
        let mut url = Url::parse(trimmed).map_err(|error| {
            RealtimeError::Configuration(format!("Invalid realtime base URL {trimmed}: {error}"))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(RealtimeError::Configuration(format!(
                "Realtime base URL must use ws:// or wss://, got {trimmed}"
            )));
        }
        url.query_pairs_mut().append_pair("model", &self.model);
        Ok(Endpoint::new(url.to_string(), api_key))
    }
}

/// Serialize a `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
