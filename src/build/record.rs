//! Build records and output checksums

use crate::error::{BuildError, StoreError};
use crate::store::indexes::BUILD_RECORD_TYPE;
use crate::store::Document;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

/// Checksum and size of one output file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSum {
    /// BLAKE3 hex digest
    pub sum: String,
    pub size: u64,
}

/// Output files keyed by path relative to the output root, `/`-separated
pub type FileSums = BTreeMap<String, FileSum>;

/// A completed build as stored in the document store
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRecord {
    /// Assigned by the store; empty until the record is created
    pub id: String,
    pub rev: u64,
    pub feed_id: String,
    pub time: DateTime<Utc>,
    pub seq: u64,
    pub files: FileSums,
    pub meta: Value,
}

#[derive(Serialize, Deserialize)]
struct RecordBody {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "feedID")]
    feed_id: String,
    time: DateTime<Utc>,
    #[serde(default)]
    seq: u64,
    #[serde(default)]
    files: FileSums,
    #[serde(default)]
    meta: Value,
}

impl BuildRecord {
    /// A not-yet-stored record following `previous`.
    pub fn next(
        feed_id: impl Into<String>,
        time: DateTime<Utc>,
        previous: Option<&BuildRecord>,
        files: FileSums,
        meta: Value,
    ) -> Self {
        Self {
            id: String::new(),
            rev: 0,
            feed_id: feed_id.into(),
            time,
            seq: previous.map_or(0, |p| p.seq) + 1,
            files,
            meta,
        }
    }

    pub fn from_document(doc: Document) -> Result<Self, StoreError> {
        let body: RecordBody = serde_json::from_value(Value::Object(doc.body))?;
        if body.kind != BUILD_RECORD_TYPE {
            return Err(StoreError::Serialization(format!(
                "document {} is a {:?}, not a build record",
                doc.id, body.kind
            )));
        }
        Ok(Self {
            id: doc.id,
            rev: doc.rev,
            feed_id: body.feed_id,
            time: body.time,
            seq: body.seq,
            files: body.files,
            meta: body.meta,
        })
    }

    pub fn to_body(&self) -> Result<Map<String, Value>, StoreError> {
        let body = RecordBody {
            kind: BUILD_RECORD_TYPE.to_string(),
            feed_id: self.feed_id.clone(),
            time: self.time,
            seq: self.seq,
            files: self.files.clone(),
            meta: self.meta.clone(),
        };
        match serde_json::to_value(body)? {
            Value::Object(map) => Ok(map),
            other => Err(StoreError::Serialization(format!(
                "build record serialized to {}",
                other
            ))),
        }
    }

    /// Output filenames in sorted order.
    pub fn file_list(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }
}

/// Checksum every file under `root`.
pub fn checksum_tree(root: &Path) -> Result<FileSums, BuildError> {
    let mut sums = FileSums::new();
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            BuildError::io(path, std::io::Error::other(e.to_string()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let bytes = std::fs::read(entry.path()).map_err(|e| BuildError::io(entry.path(), e))?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        sums.insert(
            rel,
            FileSum {
                sum: blake3::hash(&bytes).to_hex().to_string(),
                size: bytes.len() as u64,
            },
        );
    }
    Ok(sums)
}

/// Whether a build differs from the one before it.
///
/// Without a previous build any output counts as new. Otherwise the sorted filename
/// lists, then each file's sum and size, then the meta are compared.
pub fn has_new_content(files: &FileSums, meta: &Value, previous: Option<&BuildRecord>) -> bool {
    let Some(prev) = previous else {
        return !files.is_empty();
    };
    if files.len() != prev.files.len() {
        return true;
    }
    let changed_file = files
        .iter()
        .zip(prev.files.iter())
        .any(|((name, sum), (prev_name, prev_sum))| name != prev_name || sum != prev_sum);
    changed_file || *meta != prev.meta
}

/// File-level differences between two builds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDiff {
    pub changes: Vec<String>,
    pub additions: Vec<String>,
    pub deletions: Vec<String>,
}

impl BuildDiff {
    pub fn between(from: &FileSums, to: &FileSums) -> Self {
        let mut diff = BuildDiff::default();
        for (name, sum) in to {
            match from.get(name) {
                None => diff.additions.push(name.clone()),
                Some(prev) if prev != sum => diff.changes.push(name.clone()),
                Some(_) => {}
            }
        }
        diff.deletions = from
            .keys()
            .filter(|name| !to.contains_key(*name))
            .cloned()
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.additions.is_empty() && self.deletions.is_empty()
    }

    /// Files a diff archive has to carry.
    pub fn packaged_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .additions
            .iter()
            .chain(self.changes.iter())
            .cloned()
            .collect();
        files.sort();
        files
    }
}
