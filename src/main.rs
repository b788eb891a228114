//! CLI entry point for smartdl.

use anyhow::Result;
use clap::Parser;
use tracing::debug;

mod cli;
mod commands;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?cli, "CLI arguments parsed");

    let config = commands::load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Run => commands::run_scheduler(&config).await,
        Command::Add { locators } => commands::run_add(&config, &locators).await,
        Command::Status { id } => commands::run_status(&config, id).await,
        Command::List { state } => commands::run_list(&config, state).await,
        Command::Cancel { id } => commands::run_cancel(&config, id).await,
        Command::Summary => commands::run_summary(&config).await,
    }
}
