//! Feed-level access to the document store: feed records, posts, build records and the
//! persisted build queue.

use crate::build::{BuildOptions, BuildRecord};
use crate::error::StoreError;
use crate::store::indexes::{
    self, BUILDS_INDEX, FEED_ID, FEED_POSTS_INDEX, FEED_POST_INDEX, FEED_RECORD, FEED_RECORD_INDEX,
};
use crate::store::{BulkOp, Document, DocumentStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Retries after the first failed attempt before a conflict is surfaced.
pub const MAX_CONFLICT_RETRIES: u32 = 20;

/// Fixed id of the persisted build-queue document.
pub const BUILD_QUEUE_DOC_ID: &str = "feedbuild.build-queue";

/// Run `attempt` until it stops failing with a conflict.
///
/// The closure receives the 1-based attempt number and is expected to re-fetch whatever
/// it is about to update. Conflicts are retried up to [`MAX_CONFLICT_RETRIES`] times.
pub fn retry_on_conflict<T, F>(what: &str, mut attempt: F) -> Result<T, StoreError>
where
    F: FnMut(u32) -> Result<T, StoreError>,
{
    let mut n = 1;
    loop {
        match attempt(n) {
            Err(err) if err.is_conflict() && n <= MAX_CONFLICT_RETRIES => {
                debug!(what, attempt = n, "Update conflict, retrying");
                n += 1;
            }
            Err(err) => {
                if err.is_conflict() {
                    warn!(what, attempts = n, "Giving up after repeated update conflicts");
                }
                return Err(err);
            }
            ok => return ok,
        }
    }
}

/// One persisted build-queue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedBuild {
    pub feed: String,
    #[serde(default)]
    pub opts: BuildOptions,
    /// Due time, milliseconds since the epoch
    pub time: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BuildQueueDoc {
    #[serde(default)]
    queue: Vec<QueuedBuild>,
}

/// Feed-oriented façade over a [`DocumentStore`]
#[derive(Clone)]
pub struct FeedDb {
    store: Arc<dyn DocumentStore>,
}

impl FeedDb {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn install_indexes(&self) -> Result<(), StoreError> {
        for def in indexes::ALL {
            self.store.install_index(def)?;
        }
        Ok(())
    }

    /// The feed's record, created on first access.
    pub fn get_feed_record(&self, feed_id: &str) -> Result<Document, StoreError> {
        if let Some(doc) = self
            .store
            .query(FEED_RECORD_INDEX, &json!(feed_id))?
            .into_iter()
            .next()
        {
            return Ok(doc);
        }
        let mut body = Map::new();
        body.insert(FEED_ID.to_string(), json!(feed_id));
        body.insert(FEED_RECORD.to_string(), json!(true));
        debug!(feed_id, "Creating feed record");
        self.store.create(body)
    }

    pub fn get_feed_posts(&self, feed_id: &str) -> Result<Vec<Document>, StoreError> {
        self.store.query(FEED_POSTS_INDEX, &json!(feed_id))
    }

    pub fn get_feed_post(&self, feed_id: &str, post_id: &Value) -> Result<Option<Document>, StoreError> {
        Ok(self
            .store
            .query(FEED_POST_INDEX, &json!([feed_id, post_id]))?
            .into_iter()
            .next())
    }

    /// Build records of a feed, newest first.
    pub fn get_feed_builds(&self, feed_id: &str) -> Result<Vec<BuildRecord>, StoreError> {
        let mut builds = self
            .store
            .query(BUILDS_INDEX, &json!(feed_id))?
            .into_iter()
            .map(BuildRecord::from_document)
            .collect::<Result<Vec<_>, _>>()?;
        builds.sort_by(|a, b| b.time.cmp(&a.time).then(b.seq.cmp(&a.seq)));
        Ok(builds)
    }

    pub fn latest_build(&self, feed_id: &str) -> Result<Option<BuildRecord>, StoreError> {
        Ok(self.get_feed_builds(feed_id)?.into_iter().next())
    }

    /// Persist a new build record and return it with its assigned id.
    pub fn create_build_record(&self, record: &BuildRecord) -> Result<BuildRecord, StoreError> {
        let doc = self.store.create(record.to_body()?)?;
        BuildRecord::from_document(doc)
    }

    /// Delete documents, returning how many were removed.
    pub fn remove_documents(&self, docs: Vec<Document>) -> Result<usize, StoreError> {
        let ops = docs
            .into_iter()
            .map(|doc| BulkOp::Delete {
                id: doc.id,
                rev: doc.rev,
            })
            .collect();
        let mut removed = 0;
        for result in self.store.bulk(ops) {
            match result {
                Ok(_) => removed += 1,
                Err(StoreError::NotFound(id)) => debug!(id, "Document already gone"),
                Err(err) => return Err(err),
            }
        }
        Ok(removed)
    }

    pub fn remove_build_records(&self, builds: &[BuildRecord]) -> Result<usize, StoreError> {
        let docs = builds
            .iter()
            .map(|b| Document {
                id: b.id.clone(),
                rev: b.rev,
                body: Map::new(),
            })
            .collect();
        self.remove_documents(docs)
    }

    /// Every feed id that has at least one build record.
    pub fn unique_build_feed_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .store
            .index_keys(BUILDS_INDEX)?
            .into_iter()
            .filter_map(|key| key.as_str().map(str::to_string))
            .collect())
    }

    /// Re-fetch, modify and save the feed record until the save does not conflict.
    pub fn update_feed_record<F>(&self, feed_id: &str, mut apply: F) -> Result<Document, StoreError>
    where
        F: FnMut(&mut Map<String, Value>),
    {
        retry_on_conflict(&format!("feed record {}", feed_id), |_| {
            let mut doc = self.get_feed_record(feed_id)?;
            apply(&mut doc.body);
            self.store.update(&doc)
        })
    }

    /// Insert or update a post keyed by `$id`. Returns whether anything was written.
    pub fn upsert_post(&self, feed_id: &str, post: Map<String, Value>) -> Result<bool, StoreError> {
        let Some(post_id) = post.get(indexes::POST_ID).cloned() else {
            self.store.create(post)?;
            return Ok(true);
        };

        retry_on_conflict(&format!("post {} of {}", post_id, feed_id), |_| {
            match self.get_feed_post(feed_id, &post_id)? {
                Some(existing) if existing.body == post => Ok(false),
                Some(existing) => {
                    let doc = Document {
                        id: existing.id,
                        rev: existing.rev,
                        body: post.clone(),
                    };
                    self.store.update(&doc).map(|_| true)
                }
                None => self.store.create(post.clone()).map(|_| true),
            }
        })
    }

    pub fn load_build_queue(&self) -> Result<Vec<QueuedBuild>, StoreError> {
        let Some(doc) = self.store.get(BUILD_QUEUE_DOC_ID)? else {
            return Ok(Vec::new());
        };
        let parsed: BuildQueueDoc = serde_json::from_value(Value::Object(doc.body))?;
        Ok(parsed.queue)
    }

    pub fn save_build_queue(&self, queue: &[QueuedBuild]) -> Result<(), StoreError> {
        let mut body = Map::new();
        body.insert("queue".to_string(), serde_json::to_value(queue)?);
        self.store.put(BUILD_QUEUE_DOC_ID, body)?;
        Ok(())
    }
}
