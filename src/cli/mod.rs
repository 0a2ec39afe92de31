//! Command-line interface definitions.

pub mod check;
pub mod list;
pub mod log;
pub mod output;
pub mod run;
pub mod status;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Liveability - Urban Liveability Index ETL pipeline.
#[derive(Parser, Debug)]
#[command(name = "liveability")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run pipeline steps (all of them by default, foreground)
    Run(RunArgs),

    /// List the pipeline steps in execution order
    List,

    /// Show which step output tables exist and their row counts
    Status(ConfigPathArg),

    /// Run diagnostic checks
    #[command(subcommand)]
    Check(CheckCommand),

    /// Show recent rows of the shared run log
    Log(LogArgs),
}

/// Subcommands for `liveability check`
#[derive(Subcommand, Debug)]
pub enum CheckCommand {
    /// Validate configuration file
    Config(ConfigPathArg),
    /// Test the database connection and spatial extensions
    Database(ConfigPathArg),
    /// Verify the routable network and parcel tables
    Network(ConfigPathArg),
}

/// Shared argument for commands that only need a config path.
#[derive(Parser, Debug)]
pub struct ConfigPathArg {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// First step to run (sequence number or slug)
    #[arg(long)]
    pub from: Option<String>,

    /// Last step to run (sequence number or slug)
    #[arg(long)]
    pub to: Option<String>,

    /// Run a single step (sequence number or slug)
    #[arg(long, conflicts_with_all = ["from", "to"])]
    pub only: Option<String>,

    /// Override worker pool width for the per-hex steps
    #[arg(long)]
    pub workers: Option<usize>,

    /// Override log level (debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Use JSON log format instead of pretty
    #[arg(long)]
    pub json_logs: bool,
}

/// Arguments for the `log` subcommand.
#[derive(Parser, Debug)]
pub struct LogArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Number of rows to show
    #[arg(short = 'n', long, default_value = "20")]
    pub rows: usize,
}
