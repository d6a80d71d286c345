//! Feeds and the feed registry
//!
//! A feed pairs a download script, which pulls external data into the document store,
//! with a build script, which turns the stored data into an output tree.

use crate::build::manifest::{default_manifest_meta, ManifestMetaFn};
use crate::context::{BuildContext, DownloadContext};
use crate::error::{BuildError, FeedError};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Queues the operations of one download.
///
/// Calls on the context queue work and return immediately; the download runs when the
/// context is committed.
pub trait DownloadScript: Send + Sync {
    fn download(&self, cx: &DownloadContext) -> Result<(), BuildError>;
}

impl<F> DownloadScript for F
where
    F: Fn(&DownloadContext) -> Result<(), BuildError> + Send + Sync,
{
    fn download(&self, cx: &DownloadContext) -> Result<(), BuildError> {
        self(cx)
    }
}

/// Queues the operations of one build and returns the build's meta.
pub trait BuildScript: Send + Sync {
    fn build(&self, cx: &BuildContext) -> Result<Value, BuildError>;
}

impl<F> BuildScript for F
where
    F: Fn(&BuildContext) -> Result<Value, BuildError> + Send + Sync,
{
    fn build(&self, cx: &BuildContext) -> Result<Value, BuildError> {
        self(cx)
    }
}

/// When a feed is downloaded without an external trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Every(Duration),
}

impl Schedule {
    pub fn period(&self) -> Duration {
        match self {
            Schedule::Every(period) => *period,
        }
    }
}

#[derive(Clone)]
pub struct Feed {
    pub id: String,
    pub active: bool,
    pub schedule: Option<Schedule>,
    /// Input root of the build
    pub in_path: PathBuf,
    pub download: Arc<dyn DownloadScript>,
    pub build: Arc<dyn BuildScript>,
    pub manifest_meta: ManifestMetaFn,
}

impl Feed {
    pub fn new(
        id: impl Into<String>,
        in_path: impl Into<PathBuf>,
        download: impl DownloadScript + 'static,
        build: impl BuildScript + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            active: true,
            schedule: None,
            in_path: in_path.into(),
            download: Arc::new(download),
            build: Arc::new(build),
            manifest_meta: default_manifest_meta(),
        }
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn with_manifest_meta<F>(mut self, serialize: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.manifest_meta = Arc::new(serialize);
        self
    }

    pub fn in_path(&self) -> &Path {
        &self.in_path
    }
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("id", &self.id)
            .field("active", &self.active)
            .field("schedule", &self.schedule)
            .field("in_path", &self.in_path)
            .finish()
    }
}

/// Registered feeds, keyed by id
#[derive(Default)]
pub struct FeedRegistry {
    feeds: RwLock<BTreeMap<String, Arc<Feed>>>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feeds(feeds: Vec<Feed>) -> Self {
        let registry = Self::new();
        registry.install(feeds);
        registry
    }

    /// Replace the registered set.
    pub fn install(&self, feeds: Vec<Feed>) {
        let feeds = feeds
            .into_iter()
            .map(|feed| (feed.id.clone(), Arc::new(feed)))
            .collect();
        *self.feeds.write() = feeds;
    }

    pub fn get(&self, feed_id: &str) -> Option<Arc<Feed>> {
        self.feeds.read().get(feed_id).cloned()
    }

    pub fn require(&self, feed_id: &str) -> Result<Arc<Feed>, FeedError> {
        self.get(feed_id)
            .ok_or_else(|| FeedError::FeedNotFound(feed_id.to_string()))
    }

    pub fn contains(&self, feed_id: &str) -> bool {
        self.feeds.read().contains_key(feed_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.feeds.read().keys().cloned().collect()
    }

    /// Active feeds in id order.
    pub fn active(&self) -> Vec<Arc<Feed>> {
        self.feeds
            .read()
            .values()
            .filter(|feed| feed.active)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.feeds.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.read().is_empty()
    }
}
