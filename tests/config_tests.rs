//! Tests for loading realtime configuration from TOML files.

use std::io::Write;
use std::time::Duration;

use meet_realtime::config::{RealtimeConfig, Voice, DEFAULT_BASE_URL};
use meet_realtime::error::{ErrorCategory, RealtimeError};

#[test]
fn toml_file_overrides_selected_fields() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file should be created");
    writeln!(
        file,
        r#"
model = "gpt-4o-realtime-preview"
voice = "nova"
instructions = "Take notes for the standup"
connect_timeout = 2500

[reconnect]
max_attempts = 5
base_delay = 500

[audio]
capture_block_size = 2048
"#
    )
    .expect("config should be written");

    let config = RealtimeConfig::from_file(file.path()).expect("config should load");
    assert_eq!(config.model, "gpt-4o-realtime-preview");
    assert_eq!(config.voice, Voice::Nova);
    assert_eq!(config.instructions, "Take notes for the standup");
    assert_eq!(config.connect_timeout, Duration::from_millis(2500));
    assert_eq!(config.reconnect.max_attempts, 5);
    assert_eq!(config.reconnect.base_delay, Duration::from_millis(500));
    assert_eq!(config.audio.capture_block_size, 2048);
    assert_eq!(config.audio.sample_rate, 24_000);
    assert_eq!(config.base_url, DEFAULT_BASE_URL);
    assert!(config.api_key.is_none());
}

#[test]
fn invalid_toml_is_a_configuration_error() {
    let error = RealtimeConfig::from_toml_str("voice = [").expect_err("parse should fail");
    assert!(matches!(error, RealtimeError::Configuration(_)));
    assert_eq!(error.category(), ErrorCategory::Configuration);
    assert!(!error.is_retryable());
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    let error = RealtimeConfig::from_file(dir.path().join("absent.toml"))
        .expect_err("missing file should fail");
    assert!(matches!(error, RealtimeError::Io(_)));
}

#[test]
fn debug_output_redacts_api_key() {
    let config = RealtimeConfig {
        api_key: Some("sk-very-secret".into()),
        ..Default::default()
    };
    let rendered = format!("{config:?}");
    assert!(!rendered.contains("sk-very-secret"));
    assert!(rendered.contains("base_url"));
}
