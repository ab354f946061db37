//! CLI parse: clap types for the operator CLI. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Dataprivacy operator CLI - inspect and maintain the data request pipeline
#[derive(Parser)]
#[command(name = "dataprivacy")]
#[command(about = "Inspect data requests, re-drive background jobs and maintain export archives")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Data requests (list, show, cancel)
    Requests {
        #[command(subcommand)]
        command: RequestCommands,
    },
    /// Background jobs (list, stats, requeue)
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Stored export archives (list, purge, verify-link)
    Archives {
        #[command(subcommand)]
        command: ArchiveCommands,
    },
    /// Configuration (validate, show)
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum RequestCommands {
    /// List data requests
    List {
        /// Only requests where this user is subject or requester
        #[arg(long)]
        user: Option<u64>,
        /// Include completed, cancelled and rejected requests
        #[arg(long)]
        all: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show one request with its per-component contexts
    Show {
        /// Request id
        id: u64,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Cancel a request that has not started processing
    Cancel {
        /// Request id
        id: u64,
    },
}

#[derive(Subcommand)]
pub enum JobCommands {
    /// List queued, claimed and failed jobs
    List {
        /// Only failed jobs
        #[arg(long)]
        failed: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show queue counters
    Stats {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Put a failed job back on the queue
    Requeue {
        /// Job id
        id: u64,
    },
}

#[derive(Subcommand)]
pub enum ArchiveCommands {
    /// List stored archives
    List {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Delete archives older than the retention period
    Purge {
        /// Override export.retention_days
        #[arg(long)]
        older_than_days: Option<u32>,
        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Check a download link against the configured signing secret
    VerifyLink {
        /// Full download URL
        url: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate the effective configuration
    Validate,
    /// Print the effective configuration as TOML (secrets redacted)
    Show,
}
