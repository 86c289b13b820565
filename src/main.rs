// Main entry point - Configuration, logging and command dispatch
use anyhow::Context;
use clap::Parser;
use race_telemetry::infrastructure::config::{load_settings, load_settings_from};
use race_telemetry::presentation::app_state::AppState;
use race_telemetry::presentation::cli::{Cli, Command};
use race_telemetry::presentation::handlers::{run_parse, run_track, run_watch};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let settings = match &cli.config {
        Some(path) => load_settings_from(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => load_settings().context("Failed to load settings")?,
    };

    // Initialize tracing; stdout is reserved for command output
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let state = AppState::new(settings);

    match &cli.command {
        Command::Parse(args) => run_parse(&state, args).await,
        Command::Track(args) => run_track(&state, args).await,
        Command::Watch(args) => run_watch(&state, args).await,
    }
}
