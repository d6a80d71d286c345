//! Per-feed download queue
//!
//! Each feed has its own FIFO of download requests and at most one of them runs at a
//! time. Feeds do not wait on each other. A download that fails or panics settles its
//! request with the error and the lane moves on to the next one.

use crate::build::BuildRecord;
use crate::clock::Clock;
use crate::context::DownloadContext;
use crate::error::{BuildError, FeedError};
use crate::feed::Feed;
use crate::http::HttpFetch;
use crate::store::FeedDb;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

struct DownloadRequest {
    feed: Arc<Feed>,
    url: Option<String>,
    reply: oneshot::Sender<Result<bool, FeedError>>,
}

#[derive(Default)]
struct FeedLane {
    pending: VecDeque<DownloadRequest>,
    running: bool,
}

struct DownloadInner {
    db: FeedDb,
    http: Arc<dyn HttpFetch>,
    clock: Clock,
    lanes: Mutex<HashMap<String, FeedLane>>,
}

#[derive(Clone)]
pub struct DownloadQueue {
    inner: Arc<DownloadInner>,
}

impl DownloadQueue {
    pub fn new(db: FeedDb, http: Arc<dyn HttpFetch>, clock: Clock) -> Self {
        Self {
            inner: Arc::new(DownloadInner {
                db,
                http,
                clock,
                lanes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Queue a download of `feed`, optionally for a single `url`.
    ///
    /// The request is queued before this returns; the future resolves to whether the
    /// download wrote anything.
    pub fn download_feed(
        &self,
        feed: Arc<Feed>,
        url: Option<String>,
    ) -> BoxFuture<'static, Result<bool, FeedError>> {
        let feed_id = feed.id.clone();
        let (reply, rx) = oneshot::channel();
        {
            let mut lanes = self.inner.lanes.lock();
            let lane = lanes.entry(feed_id.clone()).or_default();
            lane.pending.push_back(DownloadRequest { feed, url, reply });
            debug!(feed_id = %feed_id, queued = lane.pending.len(), "Download requested");
        }
        self.process_queue(&feed_id);

        async move {
            rx.await
                .map_err(|_| FeedError::QueueClosed(feed_id))?
        }
        .boxed()
    }

    /// Feeds with queued or running downloads.
    pub fn active_feeds(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lanes.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn process_queue(&self, feed_id: &str) {
        let request = {
            let mut lanes = self.inner.lanes.lock();
            let Some(lane) = lanes.get_mut(feed_id) else {
                return;
            };
            if lane.running {
                return;
            }
            match lane.pending.pop_front() {
                Some(request) => {
                    lane.running = true;
                    request
                }
                None => {
                    lanes.remove(feed_id);
                    return;
                }
            }
        };

        let queue = self.clone();
        let feed_id = feed_id.to_string();
        tokio::spawn(async move {
            let run = AssertUnwindSafe(queue.run(&request.feed, request.url.clone()));
            let result = run.catch_unwind().await.unwrap_or_else(|payload| {
                Err(BuildError::panicked(format!("download of {}", feed_id), payload).into())
            });
            if let Err(err) = &result {
                error!(feed_id = %feed_id, error = %err, "Download failed");
            }
            let _ = request.reply.send(result);

            if let Some(lane) = queue.inner.lanes.lock().get_mut(&feed_id) {
                lane.running = false;
            }
            queue.process_queue(&feed_id);
        });
    }

    async fn run(&self, feed: &Feed, url: Option<String>) -> Result<bool, FeedError> {
        let db = &self.inner.db;
        let record = db.get_feed_record(&feed.id)?;
        let last_build: Option<BuildRecord> = db.latest_build(&feed.id)?;

        let cx = DownloadContext::new(
            feed.id.clone(),
            url,
            record,
            last_build,
            db.clone(),
            self.inner.http.clone(),
            self.inner.clock,
        );
        debug!(feed_id = %feed.id, "Running download script");
        feed.download.download(&cx)?;
        let dirty = cx.commit().await?;
        info!(feed_id = %feed.id, dirty, "Download complete");
        Ok(dirty)
    }
}
