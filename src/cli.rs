//! CLI domain: parse, route, output and presentation.
//! Store maintenance only; feeds themselves are registered by the embedding program.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands, ConfigCommands};
pub use presentation::{
    format_builds_json, format_builds_text, format_cleanup_report, format_queue_json,
    format_queue_text,
};
pub use route::RunContext;
