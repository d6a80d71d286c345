//! Script-facing contexts
//!
//! A [`BuildContext`] is what a feed's build script sees: collection constructors over the
//! input tree, wired to an operation queue and the build's output root. A
//! [`DownloadContext`] plays the same role for download scripts, over the document store.

pub mod build;
pub mod download;

pub use build::{BuildContext, BuildContextBuilder, Ref, Refs};
pub use download::{DownloadContext, FeedData, PostSelector, Posts, RecordValue};

use crate::engine::index::DirectoryIndex;
use crate::engine::template::TemplateRenderer;
use crate::engine::Engine;
use crate::entity::{ImageArena, ImageService};
use crate::http::HttpFetch;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything the entities of one build share.
pub struct Scope {
    pub(crate) engine: Engine,
    /// Canonical input root. Sources under it are never moved or deleted.
    pub(crate) in_root: PathBuf,
    pub(crate) out_root: PathBuf,
    pub(crate) index: DirectoryIndex,
    pub(crate) images: ImageArena,
    pub(crate) image_service: Arc<dyn ImageService>,
    pub(crate) renderer: Arc<dyn TemplateRenderer>,
    pub(crate) http: Arc<dyn HttpFetch>,
    pub(crate) data: Value,
}
