//! Build queue
//!
//! Build requests wait out a latency window before they run. A request for a feed that is
//! already waiting with the same options replaces the waiting one and restarts its window,
//! so a burst of triggers yields one build, `latency` after the last of them.
//!
//! Only the head of the queue is ever considered. It runs once due; a single timer wakes
//! the queue when the head is not due yet. The queue is persisted after every change and
//! reloaded by [`BuildQueue::start`]. A build that fails or panics still leaves the
//! queue, so the entries behind it run.

use crate::build::{BuildOptions, FeedBuilder};
use crate::clock::Clock;
use crate::error::{BuildError, FeedError};
use crate::feed::FeedRegistry;
use crate::store::{FeedDb, QueuedBuild};
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// One waiting or running build request
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub feed: String,
    pub opts: BuildOptions,
    /// Earliest start, milliseconds since the epoch
    pub due_at: i64,
    pub building: bool,
}

impl QueueEntry {
    fn to_persisted(&self) -> QueuedBuild {
        QueuedBuild {
            feed: self.feed.clone(),
            opts: self.opts.clone(),
            time: self.due_at,
        }
    }
}

#[derive(Default)]
struct QueueState {
    entries: Vec<QueueEntry>,
    timer_armed: bool,
}

struct QueueInner {
    registry: Arc<FeedRegistry>,
    builder: Arc<dyn FeedBuilder>,
    db: FeedDb,
    latency: Duration,
    clock: Clock,
    state: Mutex<QueueState>,
}

#[derive(Clone)]
pub struct BuildQueue {
    inner: Arc<QueueInner>,
}

impl BuildQueue {
    pub fn new(
        registry: Arc<FeedRegistry>,
        builder: Arc<dyn FeedBuilder>,
        db: FeedDb,
        latency: Duration,
        clock: Clock,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                registry,
                builder,
                db,
                latency,
                clock,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn latency(&self) -> Duration {
        self.inner.latency
    }

    /// Reload the persisted queue and resume processing.
    ///
    /// Entries for feeds that are no longer registered are dropped. Persisted due times
    /// are kept as they were.
    pub fn start(&self) -> Result<(), FeedError> {
        let persisted = self.inner.db.load_build_queue()?;
        let loaded = persisted.len();
        let entries: Vec<QueueEntry> = persisted
            .into_iter()
            .filter(|q| {
                let known = self.inner.registry.contains(&q.feed);
                if !known {
                    warn!(feed_id = %q.feed, "Dropping queued build for unknown feed");
                }
                known
            })
            .map(|q| QueueEntry {
                feed: q.feed,
                opts: q.opts,
                due_at: q.time,
                building: false,
            })
            .collect();
        info!(loaded, kept = entries.len(), "Build queue started");

        {
            let mut state = self.inner.state.lock();
            state.entries = entries;
            if state.entries.len() != loaded {
                self.persist(&state.entries);
            }
        }
        self.process();
        Ok(())
    }

    /// Request a build of `feed_id`.
    pub fn enqueue(&self, feed_id: &str, opts: BuildOptions) -> Result<(), FeedError> {
        if !self.inner.registry.contains(feed_id) {
            return Err(FeedError::FeedNotFound(feed_id.to_string()));
        }
        let due_at = self.inner.clock.now_ms() + self.inner.latency.as_millis() as i64;
        {
            let mut state = self.inner.state.lock();
            if let Some(pos) = state
                .entries
                .iter()
                .position(|e| !e.building && e.feed == feed_id && e.opts == opts)
            {
                debug!(feed_id, "Replacing waiting build request");
                state.entries.remove(pos);
            }
            state.entries.push(QueueEntry {
                feed: feed_id.to_string(),
                opts,
                due_at,
                building: false,
            });
            debug!(feed_id, due_at, length = state.entries.len(), "Build requested");
            self.persist(&state.entries);
        }
        self.process();
        Ok(())
    }

    /// Entries in queue order.
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.inner.state.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look at the head: build it if due, otherwise make sure a timer will come back.
    fn process(&self) {
        let mut state = self.inner.state.lock();
        let Some(head) = state.entries.first() else {
            return;
        };
        if head.building {
            return;
        }

        let now = self.inner.clock.now_ms();
        let due_at = head.due_at;
        if due_at <= now {
            let (feed_id, opts) = (head.feed.clone(), head.opts.clone());
            state.entries[0].building = true;
            drop(state);
            self.spawn_build(feed_id, opts);
        } else if !state.timer_armed {
            state.timer_armed = true;
            let wait = Duration::from_millis((due_at - now) as u64);
            debug!(wait_ms = wait.as_millis() as u64, "Waiting for head of build queue");
            let queue = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(wait).await;
                queue.inner.state.lock().timer_armed = false;
                queue.process();
            });
        }
    }

    fn spawn_build(&self, feed_id: String, opts: BuildOptions) {
        let queue = self.clone();
        tokio::spawn(async move {
            match queue.inner.registry.get(&feed_id) {
                Some(feed) => {
                    let build = AssertUnwindSafe(queue.inner.builder.build_feed(&feed, &opts));
                    let result = build.catch_unwind().await.unwrap_or_else(|payload| {
                        Err(BuildError::panicked(format!("build of {}", feed_id), payload).into())
                    });
                    match result {
                        Ok(outcome) => debug!(
                            feed_id = %feed_id,
                            new_content = outcome.new_content,
                            "Queued build finished"
                        ),
                        Err(err) => error!(feed_id = %feed_id, error = %err, "Queued build failed"),
                    }
                }
                None => warn!(feed_id = %feed_id, "Feed was removed before its build ran"),
            }

            {
                let mut state = queue.inner.state.lock();
                if let Some(pos) = state.entries.iter().position(|e| e.building) {
                    state.entries.remove(pos);
                }
                queue.persist(&state.entries);
            }
            queue.process();
        });
    }

    fn persist(&self, entries: &[QueueEntry]) {
        let queue: Vec<QueuedBuild> = entries.iter().map(QueueEntry::to_persisted).collect();
        if let Err(err) = self.inner.db.save_build_queue(&queue) {
            error!(error = %err, "Failed to persist build queue");
        }
    }
}
