//! CLI definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Shuttle - task orchestration demo runner
#[derive(Parser)]
#[command(name = "shuttle", about = "Run a task workload through the shuttle scheduler", version)]
pub struct Cli {
    /// Path to a YAML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Override `scheduler.max-workers`
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the demo workload and write a summary report (default)
    Demo {
        /// Number of rate-limited fetch tasks
        #[arg(long, default_value_t = 12)]
        fanout: usize,

        /// Give up waiting for the workload after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },

    /// Delete every checkpoint in the configured checkpoint directory
    ClearCheckpoints,
}

impl Default for Command {
    fn default() -> Self {
        Self::Demo {
            fanout: 12,
            timeout_secs: 60,
        }
    }
}
