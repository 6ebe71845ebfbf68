//! Chorus: gateway state cache tooling
//!
//! Subcommands:
//! - `replay`: Feed a recorded event log through the synchronizer and report
//!   the facts it produced and the resulting store sizes

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chorus_state::{CacheSettings, StoreStrategy};

mod replay;

#[derive(Parser)]
#[command(name = "chorus")]
#[command(about = "Gateway entity cache and event synchronizer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines event log (`{"t": "EVENT_TYPE", "d": {...}}` per line)
    Replay {
        /// Path to the event log
        events: PathBuf,

        /// JSON settings file; command-line values override it
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Capacity of the message store
        #[arg(long, env = "CHORUS_MAX_MESSAGES")]
        max_messages: Option<usize>,

        /// Capacity of the member store
        #[arg(long, env = "CHORUS_MAX_MEMBERS")]
        max_members: Option<usize>,

        /// Store strategy: indexed or weak
        #[arg(long, env = "CHORUS_STORE_STRATEGY")]
        strategy: Option<StoreStrategy>,
    },
}

async fn load_settings(
    path: Option<&PathBuf>,
    max_messages: Option<usize>,
    max_members: Option<usize>,
    strategy: Option<StoreStrategy>,
) -> Result<CacheSettings> {
    let mut settings = match path {
        Some(path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| miette::miette!("failed to read {}: {}", path.display(), e))?;
            CacheSettings::from_json(&json).map_err(|e| miette::miette!("{}", e))?
        }
        None => CacheSettings::default(),
    };

    if let Some(max_messages) = max_messages {
        settings.max_messages = max_messages;
    }
    if let Some(max_members) = max_members {
        settings.max_members = max_members;
    }
    if let Some(strategy) = strategy {
        settings.strategy = strategy;
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "chorus=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            events,
            settings,
            max_messages,
            max_members,
            strategy,
        } => {
            let settings =
                load_settings(settings.as_ref(), max_messages, max_members, strategy).await?;
            let summary = replay::run(&events, settings).await?;
            println!("{}", summary);
            Ok(())
        }
    }
}
