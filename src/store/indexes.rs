//! Secondary index definitions used by the feed pipeline.

use crate::store::{Document, IndexDef};
use serde_json::{json, Value};

pub const FEED_ID: &str = "$feedID";
pub const FEED_RECORD: &str = "$feedRecord";
pub const POST_ID: &str = "$id";
pub const BUILD_RECORD_TYPE: &str = "build-record";

pub const FEED_RECORD_INDEX: &str = "feed-record";
pub const FEED_POSTS_INDEX: &str = "feed-posts";
pub const FEED_POST_INDEX: &str = "feed-post";
pub const BUILDS_INDEX: &str = "builds";

fn is_feed_record(doc: &Document) -> bool {
    doc.get(FEED_RECORD).and_then(Value::as_bool).unwrap_or(false)
}

fn is_build_record(doc: &Document) -> bool {
    doc.str_field("type") == Some(BUILD_RECORD_TYPE)
}

fn feed_record_key(doc: &Document) -> Option<Value> {
    if !is_feed_record(doc) {
        return None;
    }
    doc.get(FEED_ID).filter(|v| v.is_string()).cloned()
}

fn feed_posts_key(doc: &Document) -> Option<Value> {
    if is_feed_record(doc) || is_build_record(doc) {
        return None;
    }
    doc.get(FEED_ID).filter(|v| v.is_string()).cloned()
}

fn feed_post_key(doc: &Document) -> Option<Value> {
    let feed = feed_posts_key(doc)?;
    let id = doc.get(POST_ID)?;
    Some(json!([feed, id]))
}

fn builds_key(doc: &Document) -> Option<Value> {
    if !is_build_record(doc) {
        return None;
    }
    doc.get("feedID").filter(|v| v.is_string()).cloned()
}

pub const FEED_RECORD_DEF: IndexDef = IndexDef {
    name: FEED_RECORD_INDEX,
    version: 1,
    key: feed_record_key,
};

pub const FEED_POSTS_DEF: IndexDef = IndexDef {
    name: FEED_POSTS_INDEX,
    version: 1,
    key: feed_posts_key,
};

pub const FEED_POST_DEF: IndexDef = IndexDef {
    name: FEED_POST_INDEX,
    version: 1,
    key: feed_post_key,
};

pub const BUILDS_DEF: IndexDef = IndexDef {
    name: BUILDS_INDEX,
    version: 1,
    key: builds_key,
};

/// Every index the pipeline queries, installed at startup.
pub const ALL: [IndexDef; 4] = [FEED_RECORD_DEF, FEED_POSTS_DEF, FEED_POST_DEF, BUILDS_DEF];
