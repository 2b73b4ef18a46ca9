//! meet-realtime CLI binary entry point.

use std::time::Duration;

use clap::Parser;
use meet_realtime::cli::{Cli, Commands, SayArgs};
use meet_realtime::config::RealtimeConfig;
use meet_realtime::realtime::{ClientEvent, MessageRole, RealtimeClient};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Say(args) => handle_say(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn handle_say(args: SayArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = RealtimeConfig::load(args.config.as_deref())?;
    if let Some(instructions) = args.instructions {
        config.instructions = instructions;
    }
    if let Some(voice) = args.voice {
        config.voice = voice;
    }
    let wait = Duration::from_secs(args.wait_secs);

    let client = RealtimeClient::new(config);
    let mut events = client.subscribe();

    client.connect().await?;
    client.wait_until_active(wait).await?;
    client.send_text(&args.text)?;

    let reply = tokio::time::timeout(wait, async {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Message(message) if message.role == MessageRole::Agent => {
                    return Some(message.text);
                }
                ClientEvent::Error(error) => eprintln!("! {}", error.message),
                event if event.is_terminal() => return None,
                _ => {}
            }
        }
        None
    })
    .await;

    client.disconnect().await;

    match reply {
        Ok(Some(text)) => {
            println!("{text}");
            Ok(())
        }
        Ok(None) => Err("Session ended before the agent replied".into()),
        Err(_) => Err(format!("No reply within {}s", args.wait_secs).into()),
    }
}
