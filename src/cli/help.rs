//! CLI help: stable command names for logging and routing.

use crate::cli::parse::{
    ArchiveCommands, Commands, ConfigCommands, JobCommands, RequestCommands,
};

/// Command name string for logs (e.g. "requests.list", "jobs.requeue").
pub fn command_name(command: &Commands) -> String {
    match command {
        Commands::Requests { command } => format!("requests.{}", request_command_name(command)),
        Commands::Jobs { command } => format!("jobs.{}", job_command_name(command)),
        Commands::Archives { command } => format!("archives.{}", archive_command_name(command)),
        Commands::Config { command } => format!("config.{}", config_command_name(command)),
    }
}

pub fn request_command_name(command: &RequestCommands) -> &'static str {
    match command {
        RequestCommands::List { .. } => "list",
        RequestCommands::Show { .. } => "show",
        RequestCommands::Cancel { .. } => "cancel",
    }
}

pub fn job_command_name(command: &JobCommands) -> &'static str {
    match command {
        JobCommands::List { .. } => "list",
        JobCommands::Stats { .. } => "stats",
        JobCommands::Requeue { .. } => "requeue",
    }
}

pub fn archive_command_name(command: &ArchiveCommands) -> &'static str {
    match command {
        ArchiveCommands::List { .. } => "list",
        ArchiveCommands::Purge { .. } => "purge",
        ArchiveCommands::VerifyLink { .. } => "verify_link",
    }
}

pub fn config_command_name(command: &ConfigCommands) -> &'static str {
    match command {
        ConfigCommands::Validate => "validate",
        ConfigCommands::Show => "show",
    }
}

/// Commands that only read state.
pub fn is_read_only(command: &Commands) -> bool {
    match command {
        Commands::Requests { command } => !matches!(command, RequestCommands::Cancel { .. }),
        Commands::Jobs { command } => !matches!(command, JobCommands::Requeue { .. }),
        Commands::Archives { command } => match command {
            ArchiveCommands::Purge { dry_run, .. } => *dry_run,
            _ => true,
        },
        Commands::Config { .. } => true,
    }
}
