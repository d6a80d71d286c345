//! Logging
//!
//! Structured logging on top of `tracing`. Level, format and destination come from
//! the `[logging]` config section and can be overridden through `FEEDBUILD_LOG*`
//! environment variables.

use crate::error::FeedError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::{Layer, Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json, text
    #[serde(default = "default_format")]
    pub format: String,

    /// Output destination: stdout, stderr, file
    #[serde(default = "default_output")]
    pub output: String,

    /// Log file path (used when output is "file")
    #[serde(default = "default_log_file")]
    pub file: PathBuf,

    /// Colored output (text format on a terminal stream only)
    #[serde(default = "default_true")]
    pub color: bool,

    /// Per-module levels, e.g. `feedbuild::scheduler = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stdout".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from(".feedbuild/feedbuild.log")
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_format(),
            output: default_output(),
            file: default_log_file(),
            color: default_true(),
            modules: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Destination {
    Stdout,
    Stderr,
    File,
}

impl FromStr for Destination {
    type Err = FeedError;

    fn from_str(output: &str) -> Result<Self, Self::Err> {
        match output {
            "stdout" => Ok(Destination::Stdout),
            "stderr" => Ok(Destination::Stderr),
            "file" => Ok(Destination::File),
            _ => Err(FeedError::ConfigError(format!(
                "Invalid log output: {} (must be 'stdout', 'stderr' or 'file')",
                output
            ))),
        }
    }
}

/// Config and `FEEDBUILD_LOG*` overrides folded into what the subscriber needs.
#[derive(Debug)]
struct LogSettings {
    json: bool,
    destination: Destination,
    color: bool,
    file: PathBuf,
}

impl LogSettings {
    fn resolve(config: Option<&LoggingConfig>) -> Result<Self, FeedError> {
        let defaults = LoggingConfig::default();
        let config = config.unwrap_or(&defaults);

        let format = match env_override("FEEDBUILD_LOG_FORMAT") {
            Some(format) if format == "json" || format == "text" => format,
            _ => config.format.clone(),
        };
        let json = match format.as_str() {
            "json" => true,
            "text" => false,
            other => {
                return Err(FeedError::ConfigError(format!(
                    "Invalid log format: {} (must be 'json' or 'text')",
                    other
                )))
            }
        };

        let destination: Destination = env_override("FEEDBUILD_LOG_OUTPUT")
            .as_deref()
            .unwrap_or(&config.output)
            .parse()?;

        Ok(Self {
            json,
            destination,
            color: config.color && !json && destination != Destination::File,
            file: config.file.clone(),
        })
    }

    fn writer(&self) -> Result<BoxMakeWriter, FeedError> {
        Ok(match self.destination {
            Destination::Stdout => BoxMakeWriter::new(std::io::stdout),
            Destination::Stderr => BoxMakeWriter::new(std::io::stderr),
            Destination::File => BoxMakeWriter::new(Arc::new(open_log_file(&self.file)?)),
        })
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

type FilteredRegistry = Layered<EnvFilter, Registry>;

/// Initialize the global subscriber.
///
/// `FEEDBUILD_LOG`, `FEEDBUILD_LOG_MODULES`, `FEEDBUILD_LOG_FORMAT` and `FEEDBUILD_LOG_OUTPUT`
/// take precedence over `config`, which takes precedence over the defaults.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), FeedError> {
    let settings = LogSettings::resolve(config)?;
    let filter = build_env_filter(config)?;

    let layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(settings.writer()?);
    let layer: Box<dyn Layer<FilteredRegistry> + Send + Sync> = if settings.json {
        layer.json().boxed()
    } else {
        layer.with_ansi(settings.color).boxed()
    };

    Registry::default().with(filter).with(layer).try_init().map_err(|e| {
        FeedError::ConfigError(format!("Logging already initialized: {}", e))
    })
}

fn open_log_file(path: &Path) -> Result<std::fs::File, FeedError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            FeedError::ConfigError(format!("Failed to create log directory {:?}: {}", parent, e))
        })?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| FeedError::ConfigError(format!("Failed to open log file {:?}: {}", path, e)))
}

fn build_env_filter(config: Option<&LoggingConfig>) -> Result<EnvFilter, FeedError> {
    if let Ok(filter) = EnvFilter::try_from_env("FEEDBUILD_LOG") {
        return Ok(filter);
    }

    let level = config.map(|c| c.level.as_str()).unwrap_or("info");
    if level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let configured = config.into_iter().flat_map(|c| {
        c.modules
            .iter()
            .map(|(module, level)| (module.clone(), level.clone()))
    });
    let from_env = env_override("FEEDBUILD_LOG_MODULES")
        .map(|modules| parse_module_list(&modules))
        .unwrap_or_default();

    configured
        .chain(from_env)
        .try_fold(EnvFilter::new(level), |filter, (module, level)| {
            Ok(filter.add_directive(parse_directive(&module, &level)?))
        })
}

/// `a=debug, b::c=trace` into pairs; entries without `=` are skipped.
fn parse_module_list(modules: &str) -> Vec<(String, String)> {
    modules
        .split(',')
        .filter_map(|entry| entry.split_once('='))
        .map(|(module, level)| (module.trim().to_string(), level.trim().to_string()))
        .collect()
}

fn parse_directive(module: &str, level: &str) -> Result<Directive, FeedError> {
    format!("{}={}", module, level)
        .parse()
        .map_err(|e| FeedError::ConfigError(format!("Invalid log directive {}={}: {}", module, level, e)))
}
