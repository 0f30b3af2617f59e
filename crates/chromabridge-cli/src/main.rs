use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chromabridge_core::AppConfig;

mod commands;

#[derive(Parser)]
#[command(name = "chromabridge")]
#[command(author, version, about = "Bridge client for the local companion process")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the companion process and run until interrupted
    Run,
    /// Resolve the companion endpoint once and print it
    Discover,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging; RUST_LOG overrides the configured level
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Some(Commands::Run) | None => commands::run::run(config).await,
        Some(Commands::Discover) => commands::discover::run(config).await,
    }
}
