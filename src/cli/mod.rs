//! CLI entry point for meet-realtime.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Voice;

/// Realtime meeting agent CLI
#[derive(Parser, Debug)]
#[command(name = "meet-realtime", version, about = "Realtime speech session client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one text message and print the agent's reply
    Say(SayArgs),
}

/// Arguments for the `say` subcommand.
#[derive(Parser, Debug)]
pub struct SayArgs {
    /// Message to send (positional)
    pub text: String,

    /// Agent instructions for this session
    #[arg(short, long)]
    pub instructions: Option<String>,

    /// Voice (alloy, echo, fable, onyx, nova, shimmer)
    #[arg(short, long)]
    pub voice: Option<Voice>,

    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Seconds to wait for the reply
    #[arg(long, default_value_t = 30)]
    pub wait_secs: u64,
}
