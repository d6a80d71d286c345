//! Presentation: text tables and JSON for queue, builds and cleanup results.

use crate::build::BuildRecord;
use crate::cleanup::CleanupReport;
use crate::error::FeedError;
use crate::store::QueuedBuild;
use chrono::{TimeZone, Utc};
use comfy_table::Table;
use serde_json::json;

fn to_pretty(value: &serde_json::Value) -> Result<String, FeedError> {
    serde_json::to_string_pretty(value).map_err(|e| FeedError::Store(e.into()))
}

fn format_due(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(t) => t.to_rfc3339(),
        None => ms.to_string(),
    }
}

pub fn format_queue_text(queue: &[QueuedBuild]) -> String {
    if queue.is_empty() {
        return "Build queue is empty.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["#", "Feed", "Due", "Save", "Options"]);
    for (i, entry) in queue.iter().enumerate() {
        let extra = if entry.opts.extra.is_empty() {
            "-".to_string()
        } else {
            serde_json::Value::Object(entry.opts.extra.clone()).to_string()
        };
        table.add_row(vec![
            (i + 1).to_string(),
            entry.feed.clone(),
            format_due(entry.time),
            entry.opts.save_build.to_string(),
            extra,
        ]);
    }
    format!("Build queue ({} queued):\n{}", queue.len(), table)
}

pub fn format_queue_json(queue: &[QueuedBuild]) -> Result<String, FeedError> {
    let value = serde_json::to_value(queue).map_err(|e| FeedError::Store(e.into()))?;
    to_pretty(&json!({ "queue": value }))
}

pub fn format_builds_text(feed_id: &str, builds: &[BuildRecord]) -> String {
    if builds.is_empty() {
        return format!("No builds for feed '{}'.", feed_id);
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Seq", "Build", "Time", "Files", "Size"]);
    for build in builds {
        let size: u64 = build.files.values().map(|f| f.size).sum();
        table.add_row(vec![
            build.seq.to_string(),
            build.id.clone(),
            build.time.to_rfc3339(),
            build.files.len().to_string(),
            size.to_string(),
        ]);
    }
    format!("Builds for '{}' (newest first):\n{}", feed_id, table)
}

pub fn format_builds_json(feed_id: &str, builds: &[BuildRecord]) -> Result<String, FeedError> {
    let rows: Vec<serde_json::Value> = builds
        .iter()
        .map(|b| {
            json!({
                "id": b.id,
                "seq": b.seq,
                "time": b.time.to_rfc3339(),
                "files": b.files.len(),
                "meta": b.meta,
            })
        })
        .collect();
    to_pretty(&json!({ "feedID": feed_id, "builds": rows }))
}

pub fn format_cleanup_report(report: &CleanupReport) -> String {
    let verb = if report.pretend { "Would remove" } else { "Removed" };
    if report.feeds.is_empty() {
        return "Nothing to clean.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Feed", "Builds", "Directories", "Posts"]);
    for feed in &report.feeds {
        table.add_row(vec![
            feed.feed_id.clone(),
            feed.builds.len().to_string(),
            feed.directories.len().to_string(),
            feed.posts.to_string(),
        ]);
    }
    format!(
        "{} {} builds and {} posts:\n{}",
        verb,
        report.builds_removed(),
        report.posts_removed(),
        table
    )
}
