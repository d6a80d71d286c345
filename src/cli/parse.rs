//! CLI parse: clap types for feedbuild. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Feedbuild CLI - feed store maintenance
#[derive(Parser)]
#[command(name = "feedbuild")]
#[command(about = "Inspect and maintain the feedbuild store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
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
    /// Show the persisted build queue
    Queue {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// List the builds of a feed, newest first
    Builds {
        /// Feed id
        feed: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Delete old builds, optionally with their directories and the feeds' posts
    Cleanup {
        /// Feed to clean (repeatable; default: every feed with builds)
        #[arg(long = "feed")]
        feeds: Vec<String>,
        /// Builds kept per feed (default: build.retain_builds)
        #[arg(long)]
        keep: Option<usize>,
        /// Also delete stored posts
        #[arg(long)]
        posts: bool,
        /// Remove build directories under the configured publish path
        #[arg(long)]
        publish: bool,
        /// Report what would be removed without removing it
        #[arg(long)]
        pretend: bool,
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Load and validate the configuration
    Validate,
    /// Print the effective configuration as JSON
    Show,
}
