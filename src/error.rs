//! Error types for the feed build pipeline.

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Document store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document update conflict: {0}")]
    Conflict(String),

    #[error("Index not installed: {0}")]
    UnknownIndex(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Document serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Errors raised while building or downloading.
///
/// Cloneable so a single failure can be delivered to every deferred handle
/// waiting on it as well as to the commit wave that ran it.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("{op} {from:?} -> {to:?} failed (called at {caller}): {cause}")]
    FileOp {
        op: &'static str,
        from: PathBuf,
        to: PathBuf,
        caller: String,
        #[source]
        cause: Box<BuildError>,
    },

    #[error("Cannot {op} directory {from:?} onto non-directory {to:?}")]
    NotADirectory {
        op: &'static str,
        from: PathBuf,
        to: PathBuf,
    },

    #[error("write to {target} failed (called at {caller}): {cause}")]
    Write {
        target: String,
        caller: String,
        #[source]
        cause: Box<BuildError>,
    },

    #[error("Duplicate identifier in collection: {0}")]
    DuplicateId(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Image service error: {0}")]
    Image(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Deferred operation was dropped before it ran")]
    Abandoned,

    #[error("{what} panicked: {message}")]
    Panicked { what: String, message: String },

    #[error("No async runtime to run {0} outside a commit")]
    NoRuntime(String),
}

impl BuildError {
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source: Arc::new(err),
        }
    }

    pub fn script(msg: impl Into<String>) -> Self {
        BuildError::Script(msg.into())
    }

    /// Turn a caught panic payload into an error naming what was running.
    pub fn panicked(what: impl Into<String>, payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        BuildError::Panicked {
            what: what.into(),
            message,
        }
    }
}

impl From<StoreError> for BuildError {
    fn from(err: StoreError) -> Self {
        BuildError::Store(err.to_string())
    }
}

impl From<FetchError> for BuildError {
    fn from(err: FetchError) -> Self {
        BuildError::Fetch(err.to_string())
    }
}

impl From<serde_json::Error> for BuildError {
    fn from(err: serde_json::Error) -> Self {
        BuildError::InvalidData(err.to_string())
    }
}

/// HTTP fetch errors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Connection to {url} failed: {message}")]
    Connect { url: String, message: String },

    #[error("Invalid response body from {url}: {message}")]
    Body { url: String, message: String },

    #[error("HTTP error: {0}")]
    Other(String),
}

impl FetchError {
    /// Connection resets and timeouts are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Timeout { .. } | FetchError::Connect { .. })
    }
}

/// Archive packaging errors
#[derive(Debug, Clone, Error)]
pub enum ArchiveError {
    #[error("Archive I/O error at {path:?}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Zip error: {0}")]
    Zip(String),

    #[error("Packaging task failed: {0}")]
    Task(String),
}

/// Top-level pipeline errors
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Feed not found: {0}")]
    FeedNotFound(String),

    #[error("Build failed: {0}")]
    Build(#[from] BuildError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download queue dropped request for feed {0}")]
    QueueClosed(String),
}

impl From<config::ConfigError> for FeedError {
    fn from(err: config::ConfigError) -> Self {
        FeedError::ConfigError(err.to_string())
    }
}
