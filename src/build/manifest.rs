//! Build manifests
//!
//! Every build writes `manifest.json` into its output root: the build script's meta,
//! passed through a serializer, overlaid with the build's identity and file list.

use crate::build::BuildRecord;
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Turns build meta into the base of the manifest
pub type ManifestMetaFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// The default meta serializer.
///
/// `meta.db` maps table names to `{recordId: values}`. Each table is rewritten to
/// `{updates, deletes, gc}`: records mapped to objects become updates carrying their id,
/// records mapped to `null` become deletes, and `gc` is copied from `meta.gc[table]`.
pub fn serialize_manifest_meta(meta: &Value) -> Value {
    if meta.is_null() {
        return Value::Null;
    }
    let gc = meta.get("gc");
    let mut db = Map::new();
    if let Some(tables) = meta.get("db").and_then(Value::as_object) {
        for (table, records) in tables {
            let mut updates = Vec::new();
            let mut deletes = Vec::new();
            for (record_id, values) in records.as_object().into_iter().flatten() {
                match values {
                    Value::Null => deletes.push(json!(record_id)),
                    Value::Object(fields) => {
                        let mut update = fields.clone();
                        update.insert("id".to_string(), json!(record_id));
                        updates.push(Value::Object(update));
                    }
                    other => updates.push(other.clone()),
                }
            }
            let mut entry = Map::new();
            entry.insert("updates".to_string(), Value::Array(updates));
            entry.insert("deletes".to_string(), Value::Array(deletes));
            if let Some(terms) = gc.and_then(|gc| gc.get(table)) {
                entry.insert("gc".to_string(), terms.clone());
            }
            db.insert(table.clone(), Value::Object(entry));
        }
    }
    json!({ "db": db })
}

pub fn default_manifest_meta() -> ManifestMetaFn {
    Arc::new(serialize_manifest_meta)
}

/// Manifest for `record`, optionally relative to an earlier build `since`.
pub fn generate_manifest(serialize: &ManifestMetaFn, record: &BuildRecord, since: Option<&str>) -> Value {
    let mut manifest = match serialize(&record.meta) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    manifest.insert("buildid".to_string(), json!(record.id));
    manifest.insert("feedid".to_string(), json!(record.feed_id));
    manifest.insert("time".to_string(), json!(record.time));
    if let Some(since) = since {
        manifest.insert("since".to_string(), json!(since));
    }
    manifest.insert("files".to_string(), json!(record.file_list()));
    Value::Object(manifest)
}
