//! Download context: the entry point of download scripts.
//!
//! Every call queues an operation on the context's engine and returns a handle whose value
//! is filled when that operation runs. Operations run one after another in call order, so a
//! handle from an earlier call is always filled before a later operation reads it.

use crate::build::BuildRecord;
use crate::clock::Clock;
use crate::engine::template::lookup;
use crate::engine::{Deferred, Engine, WaveMode};
use crate::error::BuildError;
use crate::http::HttpFetch;
use crate::store::indexes::{FEED_ID, POST_ID};
use crate::store::{Document, FeedDb};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

const LAST_DOWNLOAD: &str = "$lastDownload";

type Slot<T> = Arc<Mutex<Option<T>>>;

fn slot<T>() -> Slot<T> {
    Arc::new(Mutex::new(None))
}

fn take_filled<T: Clone>(slot: &Slot<T>, what: &str) -> Result<T, BuildError> {
    slot.lock()
        .clone()
        .ok_or_else(|| BuildError::script(format!("{} was read before it was fetched", what)))
}

struct DownloadInner {
    engine: Engine,
    feed_id: String,
    url: Option<String>,
    record: Document,
    last_build: Option<BuildRecord>,
    db: FeedDb,
    http: Arc<dyn HttpFetch>,
    clock: Clock,
    dirty: AtomicBool,
}

#[derive(Clone)]
pub struct DownloadContext {
    inner: Arc<DownloadInner>,
}

/// Selects the posts array out of fetched data
#[derive(Clone)]
pub enum PostSelector {
    /// Dotted path; empty selects the whole value
    Path(String),
    Func(Arc<dyn Fn(&Value) -> Value + Send + Sync>),
}

impl From<&str> for PostSelector {
    fn from(path: &str) -> Self {
        PostSelector::Path(path.to_string())
    }
}

impl PostSelector {
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        PostSelector::Func(Arc::new(f))
    }

    fn select(&self, data: &Value) -> Value {
        match self {
            PostSelector::Path(path) if path.is_empty() || path == "." => data.clone(),
            PostSelector::Path(path) => lookup(data, path).cloned().unwrap_or(Value::Null),
            PostSelector::Func(f) => f(data),
        }
    }
}

/// Fetched feed data, filled when the fetch runs
#[derive(Clone)]
pub struct FeedData {
    cx: DownloadContext,
    slot: Slot<Value>,
}

/// A list of posts, filled when the operation producing it runs
#[derive(Clone)]
pub struct Posts {
    cx: DownloadContext,
    slot: Slot<Vec<Value>>,
}

/// A value to store on the feed record
#[derive(Clone)]
pub enum RecordValue {
    Value(Value),
    Posts(Posts),
}

impl From<Value> for RecordValue {
    fn from(v: Value) -> Self {
        RecordValue::Value(v)
    }
}

impl From<&Posts> for RecordValue {
    fn from(p: &Posts) -> Self {
        RecordValue::Posts(p.clone())
    }
}

impl DownloadContext {
    pub fn new(
        feed_id: impl Into<String>,
        url: Option<String>,
        record: Document,
        last_build: Option<BuildRecord>,
        db: FeedDb,
        http: Arc<dyn HttpFetch>,
        clock: Clock,
    ) -> Self {
        Self {
            inner: Arc::new(DownloadInner {
                engine: Engine::new(WaveMode::Sequential),
                feed_id: feed_id.into(),
                url,
                record,
                last_build,
                db,
                http,
                clock,
                dirty: AtomicBool::new(false),
            }),
        }
    }

    pub fn feed_id(&self) -> &str {
        &self.inner.feed_id
    }

    /// URL that triggered this download, if any.
    pub fn url(&self) -> Option<&str> {
        self.inner.url.as_deref()
    }

    /// The feed record as it was when the download started.
    pub fn feed_record(&self) -> &Document {
        &self.inner.record
    }

    pub fn last_download(&self) -> Option<DateTime<Utc>> {
        self.inner
            .record
            .str_field(LAST_DOWNLOAD)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn last_build_id(&self) -> Option<&str> {
        self.inner.last_build.as_ref().map(|b| b.id.as_str())
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::SeqCst);
    }

    fn queue<F>(&self, label: String, fut: F) -> Deferred<()>
    where
        F: Future<Output = Result<(), BuildError>> + Send + 'static,
    {
        let engine = &self.inner.engine;
        engine.defer(engine.current(), label, fut)
    }

    /// Fetch JSON from `url`.
    pub fn get(&self, url: &str) -> FeedData {
        let data = FeedData {
            cx: self.clone(),
            slot: slot(),
        };
        let (http, url, target) = (self.inner.http.clone(), url.to_string(), data.slot.clone());
        let _ = self.queue(format!("get {}", url), async move {
            let body = http.get(&url, Some("application/json")).await?;
            *target.lock() = Some(body.into_json()?);
            Ok(())
        });
        data
    }

    /// Store posts, keyed by their `id`. Marks the download dirty if any post changed.
    pub fn write(&self, posts: &Posts) {
        let cx = self.clone();
        let source = posts.slot.clone();
        let _ = self.queue(format!("write posts of {}", self.inner.feed_id), async move {
            let posts = take_filled(&source, "posts")?;
            let feed_id = &cx.inner.feed_id;
            let mut changed = 0usize;
            for post in posts {
                let Value::Object(post) = post else {
                    return Err(BuildError::InvalidData(format!(
                        "post for {} is not an object",
                        feed_id
                    )));
                };
                if cx.inner.db.upsert_post(feed_id, prepare_post(feed_id, post))? {
                    changed += 1;
                }
            }
            if changed > 0 {
                cx.mark_dirty();
            }
            debug!(feed_id = %feed_id, changed, "Wrote posts");
            Ok(())
        });
    }

    /// Merge fields into the feed record. Marks the download dirty if any field differs.
    pub fn record_fields<I, K>(&self, fields: I)
    where
        I: IntoIterator<Item = (K, RecordValue)>,
        K: Into<String>,
    {
        let fields: Vec<(String, RecordValue)> =
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let cx = self.clone();
        let _ = self.queue(format!("record {}", self.inner.feed_id), async move {
            let mut resolved = Map::new();
            for (key, value) in fields {
                let value = match value {
                    RecordValue::Value(v) => v,
                    RecordValue::Posts(p) => Value::Array(take_filled(&p.slot, "posts")?),
                };
                resolved.insert(key, value);
            }

            let snapshot = &cx.inner.record.body;
            if resolved.iter().any(|(k, v)| snapshot.get(k) != Some(v)) {
                cx.mark_dirty();
            }

            let now = cx.inner.clock.now().to_rfc3339();
            cx.inner.db.update_feed_record(&cx.inner.feed_id, |body| {
                for (k, v) in &resolved {
                    body.insert(k.clone(), v.clone());
                }
                body.insert(LAST_DOWNLOAD.to_string(), json!(now));
            })?;
            Ok(())
        });
    }

    /// Shorthand for [`record_fields`](Self::record_fields) with one field.
    pub fn record(&self, key: &str, value: impl Into<RecordValue>) {
        self.record_fields([(key.to_string(), value.into())]);
    }

    /// Delete stored posts for which `keep` is false.
    pub fn clean<F>(&self, keep: F)
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        let cx = self.clone();
        let _ = self.queue(format!("clean {}", self.inner.feed_id), async move {
            let feed_id = &cx.inner.feed_id;
            let stale: Vec<Document> = cx
                .inner
                .db
                .get_feed_posts(feed_id)?
                .into_iter()
                .filter(|post| !keep(post))
                .collect();
            let removed = cx.inner.db.remove_documents(stale)?;
            if removed > 0 {
                cx.mark_dirty();
            }
            debug!(feed_id = %feed_id, removed, "Cleaned posts");
            Ok(())
        });
    }

    /// Run the queued operations. Returns whether anything was written.
    pub async fn commit(&self) -> Result<bool, BuildError> {
        let report = self.inner.engine.commit().await?;
        let dirty = self.is_dirty();
        info!(
            feed_id = %self.inner.feed_id,
            operations = report.operations,
            dirty,
            "Download committed"
        );
        Ok(dirty)
    }
}

/// Tag a post with its feed, move `id` to `$id` and drop `_`-prefixed keys.
fn prepare_post(feed_id: &str, mut post: Map<String, Value>) -> Map<String, Value> {
    if let Some(id) = post.remove("id") {
        post.insert(POST_ID.to_string(), id);
    }
    post.retain(|k, _| !k.starts_with('_'));
    post.insert(FEED_ID.to_string(), json!(feed_id));
    post
}

impl FeedData {
    /// Select the posts array. Fails when the selection is not an array.
    pub fn posts(&self, selector: impl Into<PostSelector>) -> Posts {
        let selector = selector.into();
        let posts = Posts {
            cx: self.cx.clone(),
            slot: slot(),
        };
        let (source, target) = (self.slot.clone(), posts.slot.clone());
        let _ = self.cx.queue("select posts".to_string(), async move {
            let data = take_filled(&source, "feed data")?;
            match selector.select(&data) {
                Value::Array(items) => {
                    *target.lock() = Some(items);
                    Ok(())
                }
                other => Err(BuildError::InvalidData(format!(
                    "post selection is not an array: {}",
                    kind_of(&other)
                ))),
            }
        });
        posts
    }

    /// The fetched value, once the fetch has run.
    pub fn value(&self) -> Option<Value> {
        self.slot.lock().clone()
    }
}

impl Posts {
    pub fn map<F>(&self, f: F) -> Posts
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        let mapped = Posts {
            cx: self.cx.clone(),
            slot: slot(),
        };
        let (source, target) = (self.slot.clone(), mapped.slot.clone());
        let _ = self.cx.queue("map posts".to_string(), async move {
            let items = take_filled(&source, "posts")?;
            *target.lock() = Some(items.into_iter().map(f).collect());
            Ok(())
        });
        mapped
    }

    /// The posts, once the operation producing them has run.
    pub fn items(&self) -> Option<Vec<Value>> {
        self.slot.lock().clone()
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
