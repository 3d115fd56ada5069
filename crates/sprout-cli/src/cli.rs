use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use sprout_core::models::ActivityKind;

#[derive(Parser)]
#[command(name = "sprout")]
#[command(about = "Log plant care offline and sync it when the network allows")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Sync endpoint base URL (overrides SPROUT_SYNC_ENDPOINT)
    #[arg(long, global = true, value_name = "URL")]
    pub endpoint: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print this installation's device identifier
    Device,
    /// Record a care action for a plant
    Log {
        #[command(subcommand)]
        command: LogCommands,
    },
    /// Inspect pending actions
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Send pending actions now
    Sync {
        /// Output the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stay running and sync whenever the endpoint becomes reachable
    Watch {
        /// Seconds between reachability probes
        #[arg(long, default_value = "30", value_name = "SECS")]
        interval: u64,
    },
}

#[derive(Subcommand)]
pub enum LogCommands {
    /// Watering, fertilizing, pruning or a custom activity
    Activity {
        /// Plant identifier
        plant: String,
        /// Activity type
        #[arg(value_enum)]
        kind: ActivityKindArg,
        #[arg(long)]
        note: Option<String>,
        /// When it happened (Unix ms or RFC 3339); defaults to now
        #[arg(long, value_name = "WHEN")]
        at: Option<String>,
    },
    /// A harvest, optionally with an amount
    Harvest {
        /// Plant identifier
        plant: String,
        #[arg(long)]
        quantity: Option<f64>,
        #[arg(long)]
        unit: Option<String>,
        #[arg(long)]
        note: Option<String>,
        /// When it happened (Unix ms or RFC 3339); defaults to now
        #[arg(long, value_name = "WHEN")]
        at: Option<String>,
    },
    /// A photo kept on this device
    Photo {
        /// Plant identifier
        plant: String,
        /// Local photo location
        uri: String,
        #[arg(long)]
        note: Option<String>,
        /// When it was taken (Unix ms or RFC 3339); defaults to now
        #[arg(long, value_name = "WHEN")]
        at: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List pending actions, oldest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Give actions that hit the retry cap another chance
    RetryExhausted,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ActivityKindArg {
    Watering,
    Fertilizing,
    Pruning,
    Custom,
}

impl From<ActivityKindArg> for ActivityKind {
    fn from(value: ActivityKindArg) -> Self {
        match value {
            ActivityKindArg::Watering => Self::Watering,
            ActivityKindArg::Fertilizing => Self::Fertilizing,
            ActivityKindArg::Pruning => Self::Pruning,
            ActivityKindArg::Custom => Self::Custom,
        }
    }
}
