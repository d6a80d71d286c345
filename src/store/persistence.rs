//! sled-backed document store

use crate::error::StoreError;
use crate::store::{Document, DocumentStore, IndexDef};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use sled::{Db, Tree};
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::Path;
use tracing::{debug, info};

const TREE_DOCS: &str = "docs";
const TREE_INDEX_META: &str = "index_meta";
const INDEX_TREE_PREFIX: &str = "idx:";
const KEY_SEPARATOR: u8 = 0;

/// Sled-based implementation of DocumentStore
///
/// Documents are JSON values in the `docs` tree. Each installed index owns a tree
/// whose keys are `json(key) 0x00 doc-id`, so a key lookup is a prefix scan.
pub struct SledDocumentStore {
    db: Db,
    docs: Tree,
    index_meta: Tree,
    indexes: RwLock<HashMap<&'static str, (IndexDef, Tree)>>,
}

impl SledDocumentStore {
    /// Open (or create) a store at the given directory.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)
            .map_err(|e| to_store_io(e, "Failed to open sled database"))?;
        Self::with_db(db)
    }

    /// An in-memory store removed on drop.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| to_store_io(e, "Failed to open temporary sled database"))?;
        Self::with_db(db)
    }

    pub fn with_db(db: Db) -> Result<Self, StoreError> {
        let docs = db
            .open_tree(TREE_DOCS)
            .map_err(|e| to_store_io(e, "Failed to open docs tree"))?;
        let index_meta = db
            .open_tree(TREE_INDEX_META)
            .map_err(|e| to_store_io(e, "Failed to open index meta tree"))?;
        Ok(Self {
            db,
            docs,
            index_meta,
            indexes: RwLock::new(HashMap::new()),
        })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    fn load(&self, id: &str) -> Result<Option<(sled::IVec, Document)>, StoreError> {
        let Some(raw) = self
            .docs
            .get(id.as_bytes())
            .map_err(|e| to_store_io(e, "Failed to get document"))?
        else {
            return Ok(None);
        };
        let doc = decode(&raw)?;
        Ok(Some((raw, doc)))
    }

    /// Swap `old` for `new` under `id`, failing with a conflict if the stored bytes moved.
    fn swap(
        &self,
        id: &str,
        old: Option<sled::IVec>,
        new: Option<&Document>,
    ) -> Result<(), StoreError> {
        let encoded = new.map(encode).transpose()?;
        self.docs
            .compare_and_swap(id.as_bytes(), old, encoded)
            .map_err(|e| to_store_io(e, "Failed to write document"))?
            .map_err(|_| StoreError::Conflict(id.to_string()))
    }

    fn reindex(&self, old: Option<&Document>, new: Option<&Document>) -> Result<(), StoreError> {
        let indexes = self.indexes.read();
        for (def, tree) in indexes.values() {
            if let Some(key) = old.and_then(|doc| (def.key)(doc).map(|k| (k, doc))) {
                tree.remove(index_entry(&key.0, &key.1.id)?)
                    .map_err(|e| to_store_io(e, "Failed to remove index entry"))?;
            }
            if let Some(key) = new.and_then(|doc| (def.key)(doc).map(|k| (k, doc))) {
                tree.insert(index_entry(&key.0, &key.1.id)?, &[] as &[u8])
                    .map_err(|e| to_store_io(e, "Failed to insert index entry"))?;
            }
        }
        Ok(())
    }

    fn index_tree(&self, name: &str) -> Result<Tree, StoreError> {
        self.indexes
            .read()
            .get(name)
            .map(|(_, tree)| tree.clone())
            .ok_or_else(|| StoreError::UnknownIndex(name.to_string()))
    }

    fn next_id(&self) -> Result<String, StoreError> {
        let id = self
            .db
            .generate_id()
            .map_err(|e| to_store_io(e, "Failed to generate document id"))?;
        Ok(format!("{:016x}", id))
    }
}

impl DocumentStore for SledDocumentStore {
    fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.load(id)?.map(|(_, doc)| doc))
    }

    fn create(&self, body: Map<String, Value>) -> Result<Document, StoreError> {
        let doc = Document {
            id: self.next_id()?,
            rev: 1,
            body,
        };
        self.swap(&doc.id, None, Some(&doc))?;
        self.reindex(None, Some(&doc))?;
        Ok(doc)
    }

    fn put(&self, id: &str, body: Map<String, Value>) -> Result<Document, StoreError> {
        let current = self.load(id)?;
        let (raw, old) = match current {
            Some((raw, old)) => (Some(raw), Some(old)),
            None => (None, None),
        };
        let doc = Document {
            id: id.to_string(),
            rev: old.as_ref().map(|d| d.rev + 1).unwrap_or(1),
            body,
        };
        self.swap(id, raw, Some(&doc))?;
        self.reindex(old.as_ref(), Some(&doc))?;
        Ok(doc)
    }

    fn update(&self, doc: &Document) -> Result<Document, StoreError> {
        let (raw, stored) = self
            .load(&doc.id)?
            .ok_or_else(|| StoreError::NotFound(doc.id.clone()))?;
        if stored.rev != doc.rev {
            return Err(StoreError::Conflict(doc.id.clone()));
        }
        let next = Document {
            id: doc.id.clone(),
            rev: doc.rev + 1,
            body: doc.body.clone(),
        };
        self.swap(&doc.id, Some(raw), Some(&next))?;
        self.reindex(Some(&stored), Some(&next))?;
        Ok(next)
    }

    fn remove(&self, id: &str, rev: u64) -> Result<(), StoreError> {
        let (raw, stored) = self
            .load(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if stored.rev != rev {
            return Err(StoreError::Conflict(id.to_string()));
        }
        self.swap(id, Some(raw), None)?;
        self.reindex(Some(&stored), None)
    }

    fn install_index(&self, def: IndexDef) -> Result<bool, StoreError> {
        let tree = self
            .db
            .open_tree(format!("{}{}", INDEX_TREE_PREFIX, def.name))
            .map_err(|e| to_store_io(e, "Failed to open index tree"))?;
        let installed = self
            .index_meta
            .get(def.name.as_bytes())
            .map_err(|e| to_store_io(e, "Failed to read index meta"))?
            .and_then(|raw| <[u8; 4]>::try_from(raw.as_ref()).ok())
            .map(u32::from_be_bytes);

        let rebuild = installed != Some(def.version);
        if rebuild {
            tree.clear()
                .map_err(|e| to_store_io(e, "Failed to clear index tree"))?;
            let mut entries = 0usize;
            for item in self.docs.iter() {
                let (_, raw) = item.map_err(|e| to_store_io(e, "Failed to iterate documents"))?;
                let doc = decode(&raw)?;
                if let Some(key) = (def.key)(&doc) {
                    tree.insert(index_entry(&key, &doc.id)?, &[] as &[u8])
                        .map_err(|e| to_store_io(e, "Failed to insert index entry"))?;
                    entries += 1;
                }
            }
            self.index_meta
                .insert(def.name.as_bytes(), &def.version.to_be_bytes())
                .map_err(|e| to_store_io(e, "Failed to write index meta"))?;
            info!(index = def.name, version = def.version, entries, "Rebuilt index");
        } else {
            debug!(index = def.name, version = def.version, "Index up to date");
        }

        self.indexes.write().insert(def.name, (def, tree));
        Ok(rebuild)
    }

    fn query(&self, index: &str, key: &Value) -> Result<Vec<Document>, StoreError> {
        let tree = self.index_tree(index)?;
        let mut prefix = serde_json::to_vec(key).map_err(to_store_data)?;
        prefix.push(KEY_SEPARATOR);

        let mut out = Vec::new();
        for item in tree.scan_prefix(&prefix) {
            let (entry, _) = item.map_err(|e| to_store_io(e, "Failed to scan index"))?;
            let id = String::from_utf8_lossy(&entry[prefix.len()..]).into_owned();
            if let Some(doc) = self.get(&id)? {
                out.push(doc);
            }
        }
        Ok(out)
    }

    fn index_keys(&self, index: &str) -> Result<Vec<Value>, StoreError> {
        let tree = self.index_tree(index)?;
        let mut raw_keys = BTreeSet::new();
        for item in tree.iter() {
            let (entry, _) = item.map_err(|e| to_store_io(e, "Failed to scan index"))?;
            if let Some(split) = entry.iter().position(|b| *b == KEY_SEPARATOR) {
                raw_keys.insert(entry[..split].to_vec());
            }
        }
        raw_keys
            .into_iter()
            .map(|raw| serde_json::from_slice(&raw).map_err(to_store_data))
            .collect()
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| to_store_io(e, "Failed to flush store"))?;
        Ok(())
    }
}

fn index_entry(key: &Value, id: &str) -> Result<Vec<u8>, StoreError> {
    // JSON text never contains a raw NUL, so the separator is unambiguous.
    let mut entry = serde_json::to_vec(key).map_err(to_store_data)?;
    entry.push(KEY_SEPARATOR);
    entry.extend_from_slice(id.as_bytes());
    Ok(entry)
}

fn encode(doc: &Document) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(doc).map_err(to_store_data)
}

fn decode(raw: &[u8]) -> Result<Document, StoreError> {
    serde_json::from_slice(raw).map_err(to_store_data)
}

fn to_store_io(err: sled::Error, context: &str) -> StoreError {
    StoreError::IoError(io::Error::new(
        io::ErrorKind::Other,
        format!("{}: {}", context, err),
    ))
}

fn to_store_data(err: serde_json::Error) -> StoreError {
    StoreError::Serialization(err.to_string())
}
