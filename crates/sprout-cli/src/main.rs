//! Sprout CLI - log plant care from the terminal, offline first
//!
//! Actions are queued locally and sent to the sync endpoint when it is reachable.

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands, QueueCommands};
use crate::commands::common::{resolve_db_path, resolve_settings};
use crate::commands::device::run_device;
use crate::commands::log::run_log;
use crate::commands::queue::{run_queue_list, run_retry_exhausted};
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sprout_cli=warn,sprout_core=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let settings = resolve_settings(cli.endpoint)?;

    match cli.command {
        Commands::Device => run_device(&db_path).await?,
        Commands::Log { command } => run_log(command, &db_path).await?,
        Commands::Queue { command } => match command {
            QueueCommands::List { json } => run_queue_list(json, &settings, &db_path).await?,
            QueueCommands::RetryExhausted => run_retry_exhausted(&settings, &db_path).await?,
        },
        Commands::Sync { json } => run_sync(json, &settings, &db_path).await?,
        Commands::Watch { interval } => run_watch(interval, &settings, &db_path).await?,
    }

    Ok(())
}
