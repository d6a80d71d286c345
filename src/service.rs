//! The running pipeline: feeds, store, download queue and build queue wired together.

use crate::build::{BuildOptions, Builder, FeedBuilder};
use crate::clock::Clock;
use crate::config::{DirsConfig, FeedbuildConfig};
use crate::download::DownloadQueue;
use crate::error::FeedError;
use crate::feed::FeedRegistry;
use crate::http::{HttpFetch, ReqwestFetcher};
use crate::scheduler::BuildQueue;
use crate::store::{FeedDb, SledDocumentStore};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Status carried by a post-update message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Publish,
    Trash,
    #[serde(other)]
    Other,
}

/// A decoded post-update message from the bus
#[derive(Debug, Clone, Deserialize)]
pub struct PostUpdate {
    pub url: String,
    pub status: PostStatus,
}

impl PostUpdate {
    /// Only published and trashed posts change feed content.
    pub fn triggers_download(&self) -> bool {
        matches!(self.status, PostStatus::Publish | PostStatus::Trash)
    }
}

/// Marks a URL as downloading until dropped, including when the caller stops waiting.
struct UrlClaim<'a> {
    urls: &'a Mutex<HashSet<String>>,
    url: String,
}

impl<'a> UrlClaim<'a> {
    fn acquire(urls: &'a Mutex<HashSet<String>>, url: &str) -> Option<Self> {
        urls.lock().insert(url.to_string()).then(|| Self {
            urls,
            url: url.to_string(),
        })
    }
}

impl Drop for UrlClaim<'_> {
    fn drop(&mut self) {
        self.urls.lock().remove(&self.url);
    }
}

pub struct Service {
    registry: Arc<FeedRegistry>,
    db: FeedDb,
    downloads: DownloadQueue,
    builds: BuildQueue,
    active_urls: Mutex<HashSet<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Service {
    pub fn new(
        registry: Arc<FeedRegistry>,
        db: FeedDb,
        http: Arc<dyn HttpFetch>,
        builder: Arc<dyn FeedBuilder>,
        config: &FeedbuildConfig,
        clock: Clock,
    ) -> Self {
        let downloads = DownloadQueue::new(db.clone(), http, clock);
        let builds = BuildQueue::new(
            registry.clone(),
            builder,
            db.clone(),
            config.build.queue_latency(),
            clock,
        );
        Self {
            registry,
            db,
            downloads,
            builds,
            active_urls: Mutex::new(HashSet::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// A service over the configured sled store, HTTP client and builder.
    pub fn from_config(config: &FeedbuildConfig, registry: Arc<FeedRegistry>) -> Result<Self, FeedError> {
        let store = SledDocumentStore::new(config.resolve(&config.store.path))?;
        let db = FeedDb::new(Arc::new(store));
        let http: Arc<dyn HttpFetch> = Arc::new(ReqwestFetcher::new(&config.http)?);
        let clock = Clock::new();
        let dirs = DirsConfig {
            output: config.resolve(&config.dirs.output),
            publish: config.resolve(&config.dirs.publish),
        };
        let builder = Builder::new(db.clone(), dirs, http.clone(), clock)
            .with_wave_mode(config.build.wave_mode);
        Ok(Self::new(registry, db, http, Arc::new(builder), config, clock))
    }

    pub fn db(&self) -> &FeedDb {
        &self.db
    }

    pub fn registry(&self) -> &Arc<FeedRegistry> {
        &self.registry
    }

    pub fn build_queue(&self) -> &BuildQueue {
        &self.builds
    }

    pub fn download_queue(&self) -> &DownloadQueue {
        &self.downloads
    }

    /// Install indexes, recover the build queue and start the scheduled downloads.
    pub fn start(self: &Arc<Self>) -> Result<(), FeedError> {
        self.db.install_indexes()?;
        self.builds.start()?;

        let mut tasks = self.tasks.lock();
        for feed in self.registry.active() {
            let Some(schedule) = feed.schedule else {
                continue;
            };
            let period = schedule.period();
            info!(feed_id = %feed.id, period_secs = period.as_secs(), "Scheduling downloads");
            let service = Arc::clone(self);
            let feed_id = feed.id.clone();
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    if let Err(err) = service.process_feed(&feed_id).await {
                        error!(feed_id = %feed_id, error = %err, "Scheduled download failed");
                    }
                }
            }));
        }
        Ok(())
    }

    /// Stop the scheduled downloads.
    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Download a feed and request a build if anything changed.
    pub async fn process_feed(&self, feed_id: &str) -> Result<bool, FeedError> {
        let feed = self.registry.require(feed_id)?;
        let dirty = self.downloads.download_feed(feed, None).await?;
        if dirty {
            self.builds.enqueue(feed_id, BuildOptions::default())?;
        }
        Ok(dirty)
    }

    /// React to a post-update message.
    ///
    /// Returns `None` when the message was ignored, either for its status or because the
    /// same URL is already downloading.
    pub async fn handle_post_update(&self, feed_id: &str, update: PostUpdate) -> Result<Option<bool>, FeedError> {
        if !update.triggers_download() {
            debug!(feed_id, url = %update.url, status = ?update.status, "Ignoring post update");
            return Ok(None);
        }
        let feed = self.registry.require(feed_id)?;
        let Some(_claim) = UrlClaim::acquire(&self.active_urls, &update.url) else {
            debug!(feed_id, url = %update.url, "Already downloading");
            return Ok(None);
        };

        debug!(feed_id, url = %update.url, "Downloading post");
        let dirty = self.downloads.download_feed(feed, Some(update.url.clone())).await?;
        if dirty {
            self.builds.enqueue(feed_id, BuildOptions::default())?;
        }
        Ok(Some(dirty))
    }
}
