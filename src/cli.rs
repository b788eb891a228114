//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use smartdl_core::{JobId, JobState};

/// Queue downloads and run the download scheduler.
///
/// smartdl classifies each locator (magnet link, file URL, streaming page or
/// rendered page), resolves what to fetch, and drives an aria2 daemon to
/// fetch it, one job at a time.
#[derive(Parser, Debug)]
#[command(name = "smartdl")]
#[command(author, version, about)]
pub struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/smartdl/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Recover interrupted jobs and process the queue until Ctrl-C
    Run,

    /// Queue one or more locators
    Add {
        /// Magnet links or http(s) URLs
        #[arg(required = true, value_name = "LOCATOR")]
        locators: Vec<String>,
    },

    /// Show one job in detail
    Status {
        /// Job identifier
        id: JobId,
    },

    /// List jobs (all, or those in one state)
    List {
        /// Only jobs in this state (e.g. pending, downloading, failed)
        #[arg(long, value_name = "STATE")]
        state: Option<JobState>,
    },

    /// Request cancellation of a job
    Cancel {
        /// Job identifier
        id: JobId,
    },

    /// Show job counts per state
    Summary,
}
