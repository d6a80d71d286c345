//! Configuration System
//!
//! Layered configuration: built-in defaults, the global user file, workspace files and
//! `FEEDBUILD__*` environment variables, deserialized into [`FeedbuildConfig`] and
//! validated before use.

use crate::engine::WaveMode;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;
pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbuildConfig {
    /// Workspace root path (defaults to current directory)
    pub workspace_root: Option<PathBuf>,

    /// Output and publish directories
    #[serde(default)]
    pub dirs: DirsConfig,

    /// Build pipeline settings
    #[serde(default)]
    pub build: BuildConfig,

    /// Outbound HTTP settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Document store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirsConfig {
    /// Scratch root; each feed builds into `<output>/<feed id>`
    #[serde(default = "default_output_dir")]
    pub output: PathBuf,

    /// Publish root; each saved build lands in `<publish>/<feed id>/<build id>`
    #[serde(default = "default_publish_dir")]
    pub publish: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_publish_dir() -> PathBuf {
    PathBuf::from("publish")
}

impl Default for DirsConfig {
    fn default() -> Self {
        Self {
            output: default_output_dir(),
            publish: default_publish_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Debounce window applied to build requests
    #[serde(default = "default_queue_latency_ms")]
    pub queue_latency_ms: u64,

    /// How thunks within one commit wave are run
    #[serde(default)]
    pub wave_mode: WaveMode,

    /// Builds kept per feed by `cleanup` when no count is given
    #[serde(default = "default_retain_builds")]
    pub retain_builds: usize,
}

fn default_queue_latency_ms() -> u64 {
    60_000
}

fn default_retain_builds() -> usize {
    10
}

impl BuildConfig {
    pub fn queue_latency(&self) -> Duration {
        Duration::from_millis(self.queue_latency_ms)
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            queue_latency_ms: default_queue_latency_ms(),
            wave_mode: WaveMode::default(),
            retain_builds: default_retain_builds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Extra attempts after a connection reset or timeout
    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    250
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// sled database directory
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".feedbuild/store")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Dirs(String),
    Build(String),
    Http(String),
    Store(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Dirs(msg) => write!(f, "dirs: {}", msg),
            ValidationError::Build(msg) => write!(f, "build: {}", msg),
            ValidationError::Http(msg) => write!(f, "http: {}", msg),
            ValidationError::Store(msg) => write!(f, "store: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl FeedbuildConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.dirs.output.as_os_str().is_empty() {
            errors.push(ValidationError::Dirs("output path cannot be empty".to_string()));
        }
        if self.dirs.publish.as_os_str().is_empty() {
            errors.push(ValidationError::Dirs("publish path cannot be empty".to_string()));
        }
        if self.dirs.output == self.dirs.publish {
            errors.push(ValidationError::Dirs(
                "output and publish paths must differ".to_string(),
            ));
        }
        if self.http.connect_timeout_secs == 0 || self.http.request_timeout_secs == 0 {
            errors.push(ValidationError::Http("timeouts must be positive".to_string()));
        }
        if self.store.path.as_os_str().is_empty() {
            errors.push(ValidationError::Store("store path cannot be empty".to_string()));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Resolve a configured path against the workspace root.
    pub fn resolve(&self, path: &std::path::Path) -> PathBuf {
        match &self.workspace_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}
