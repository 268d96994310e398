// src/main.rs
// Worker daemon: ingestion consumers + component lifecycle

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use trellis::{AppState, Config};

#[derive(Parser)]
#[command(name = "trellis", about = "Retrieval-augmented QA core worker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ingestion workers until interrupted.
    Serve,
    /// Load and validate configuration, then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command.unwrap_or(Command::Serve) {
        Command::CheckConfig => {
            config.validate()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Serve => serve(config).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let state = AppState::init(config).await?;
    state.start_ingestion().await?;
    info!("ingestion workers running; press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, draining");

    if let Err(e) = state.shutdown().await {
        error!(error = %e, "shutdown incomplete");
    }
    Ok(())
}
