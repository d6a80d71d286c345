//! Document Store
//!
//! JSON documents addressed by id, carrying a revision number for optimistic
//! concurrency, plus secondary indexes computed by pure functions over each document.

pub mod feeds;
pub mod indexes;
pub mod persistence;

pub use feeds::{retry_on_conflict, FeedDb, QueuedBuild, BUILD_QUEUE_DOC_ID, MAX_CONFLICT_RETRIES};
pub use persistence::SledDocumentStore;

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// Incremented on every successful write; updates must present the current value.
    pub rev: u64,
    #[serde(default)]
    pub body: Map<String, Value>,
}

impl Document {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(Value::as_str)
    }
}

/// Maps a document to at most one index key.
pub type IndexFn = fn(&Document) -> Option<Value>;

/// A named secondary index. Bumping `version` forces a rebuild on the next install.
#[derive(Clone, Copy)]
pub struct IndexDef {
    pub name: &'static str,
    pub version: u32,
    pub key: IndexFn,
}

impl std::fmt::Debug for IndexDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDef")
            .field("name", &self.name)
            .field("version", &self.version)
            .finish()
    }
}

/// One entry of a bulk request
#[derive(Debug, Clone)]
pub enum BulkOp {
    Create(Map<String, Value>),
    Update(Document),
    Delete { id: String, rev: u64 },
}

/// Document store interface
pub trait DocumentStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// Insert a new document under a store-assigned id.
    fn create(&self, body: Map<String, Value>) -> Result<Document, StoreError>;

    /// Write a document under a fixed id regardless of its current revision.
    fn put(&self, id: &str, body: Map<String, Value>) -> Result<Document, StoreError>;

    /// Replace a document. Fails with [`StoreError::Conflict`] when `doc.rev` is stale.
    fn update(&self, doc: &Document) -> Result<Document, StoreError>;

    fn remove(&self, id: &str, rev: u64) -> Result<(), StoreError>;

    /// Install an index, rebuilding it when missing or at a different version.
    /// Returns whether a rebuild happened.
    fn install_index(&self, def: IndexDef) -> Result<bool, StoreError>;

    /// Documents whose index key equals `key`, in id order.
    fn query(&self, index: &str, key: &Value) -> Result<Vec<Document>, StoreError>;

    /// Distinct keys present in an index.
    fn index_keys(&self, index: &str) -> Result<Vec<Value>, StoreError>;

    fn flush(&self) -> Result<(), StoreError>;

    /// Apply each operation independently; per-entry failures do not stop the batch.
    fn bulk(&self, ops: Vec<BulkOp>) -> Vec<Result<Option<Document>, StoreError>> {
        ops.into_iter()
            .map(|op| match op {
                BulkOp::Create(body) => self.create(body).map(Some),
                BulkOp::Update(doc) => self.update(&doc).map(Some),
                BulkOp::Delete { id, rev } => self.remove(&id, rev).map(|_| None),
            })
            .collect()
    }
}
