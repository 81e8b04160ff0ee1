//! CLI definitions for Hopper.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Hopper CLI.
#[derive(Parser)]
#[command(name = "hopper")]
#[command(about = "Durable prioritized job queue with a schedule trigger layer")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/hopper.toml", global = true)]
    pub config: PathBuf,

    /// Job database path (overrides `store.path`)
    #[arg(long, env = "HOPPER_DB", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the queue engine and trigger layer in the foreground (default)
    Run,

    /// Enqueue a job
    Enqueue {
        /// Job type selecting the handler
        job_type: String,

        /// JSON payload handed to the handler
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Priority (higher claims first)
        #[arg(long)]
        priority: Option<i32>,

        /// Retry ceiling
        #[arg(long)]
        max_retries: Option<u32>,

        /// Delay before the job becomes eligible, in seconds
        #[arg(long)]
        delay_secs: Option<u64>,
    },

    /// Show a job as JSON
    Show {
        /// Job ID
        id: Uuid,
    },

    /// Cancel a pending job
    Cancel {
        /// Job ID
        id: Uuid,
    },

    /// Per-status counts over the last 24 hours
    Stats {
        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Check that the job store is reachable
    Health,
}
