//! CLI output: error text for the terminal.

use crate::error::FeedError;

/// Map a command error to the message printed on stderr.
pub fn map_error(e: &FeedError) -> String {
    match e {
        FeedError::ConfigError(msg) => format!("Configuration error: {}\nCheck config/config.toml or the FEEDBUILD__* environment.", msg),
        FeedError::FeedNotFound(feed) => format!("No builds or records for feed '{}'", feed),
        other => other.to_string(),
    }
}
