//! CLI domain: parse, route, output, and presentation only.
//! No pipeline logic; a single route table dispatches to the admin facade.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands, ConfigCommands, OutputFormat};
pub use route::RunContext;
