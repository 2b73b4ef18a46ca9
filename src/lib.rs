//! meet-realtime: realtime speech session client for meeting agents.
//!
//! Holds one streaming conversation with a speech model over a websocket:
//! streams microphone audio up, plays agent audio back, surfaces
//! transcripts and speaking state as events, and reconnects with bounded
//! linear backoff when the link drops.
//!
//! # Quick Start
//!
//! ```no_run
//! use meet_realtime::prelude::*;
//!
//! # async fn example() -> meet_realtime::error::Result<()> {
//! let client = RealtimeClient::new(RealtimeConfig::from_env());
//! client.on(EventKind::Message, |event| {
//!     if let ClientEvent::Message(message) = event {
//!         println!("{:?}: {}", message.role, message.text);
//!     }
//! });
//! client.connect().await?;
//! client.wait_until_active(std::time::Duration::from_secs(10)).await?;
//! client.send_text("Summarize the last five minutes")?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod prelude;
pub mod realtime;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
