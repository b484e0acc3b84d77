//! CLI definitions for jobstore.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// jobstore CLI.
#[derive(Parser)]
#[command(name = "jobstore")]
#[command(about = "Inspect and maintain a persistent job registry")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml", global = true)]
    pub config: PathBuf,

    /// State directory (overrides `store.data_dir`)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// List jobs
    List {
        /// Only jobs owned by this uid
        #[arg(long)]
        uid: Option<u32>,

        /// Only jobs whose owner belongs to this user
        #[arg(long)]
        user: Option<u32>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Show one job in detail
    Show {
        #[arg(long)]
        uid: u32,

        #[arg(long)]
        job_id: i32,
    },

    /// Decode the jobs file and report what would load
    Check,

    /// Add or replace a persisted job
    Add(AddArgs),

    /// Remove a job
    Remove {
        #[arg(long)]
        uid: u32,

        #[arg(long)]
        job_id: i32,
    },

    /// Remove every job
    Clear {
        /// Confirm removal
        #[arg(long)]
        yes: bool,
    },

    /// Load the jobs file and write it back out
    Rewrite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Table,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum BackoffArg {
    Linear,
    Exponential,
}

#[derive(clap::Args)]
pub(crate) struct AddArgs {
    /// Owner uid
    #[arg(long)]
    pub uid: u32,

    /// Job id, unique per owner
    #[arg(long)]
    pub job_id: i32,

    /// Service package
    #[arg(long)]
    pub package: String,

    /// Service class
    #[arg(long)]
    pub class: String,

    /// Run every N milliseconds
    #[arg(long, conflicts_with_all = ["delay_ms", "deadline_ms"])]
    pub periodic_ms: Option<u64>,

    /// Earliest run, N milliseconds from now
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Latest run, N milliseconds from now
    #[arg(long)]
    pub deadline_ms: Option<u64>,

    /// Require an unmetered network
    #[arg(long)]
    pub unmetered: bool,

    /// Require any network
    #[arg(long)]
    pub connectivity: bool,

    /// Require the device to be idle
    #[arg(long)]
    pub idle: bool,

    /// Require external power
    #[arg(long)]
    pub charging: bool,

    /// Back-off policy
    #[arg(long, value_enum, requires = "initial_backoff_ms")]
    pub backoff: Option<BackoffArg>,

    /// Initial back-off in milliseconds
    #[arg(long, requires = "backoff")]
    pub initial_backoff_ms: Option<u64>,

    /// Extras entry as key=value (repeatable)
    #[arg(long = "extra", value_name = "KEY=VALUE")]
    pub extras: Vec<String>,
}
