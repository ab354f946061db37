//! CLI domain: parse, route, help, output, and presentation only.
//! No pipeline orchestration; a single route table dispatches to the stores.

mod help;
mod output;
mod parse;
mod presentation;
mod route;

pub use help::command_name;
pub use output::map_error;
pub use parse::{ArchiveCommands, Cli, Commands, ConfigCommands, JobCommands, RequestCommands};
pub use route::RunContext;
