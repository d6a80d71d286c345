//! Removal of old builds and stored posts

use crate::error::FeedError;
use crate::store::FeedDb;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct CleanupOptions {
    /// Feeds to clean; empty means every feed that has builds
    pub feeds: Vec<String>,
    /// Newest builds kept per feed
    pub keep: usize,
    /// Also delete the feeds' posts
    pub posts: bool,
    /// Publish root; removed builds lose their directories too
    pub publish_path: Option<PathBuf>,
    /// Report only
    pub pretend: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedCleanup {
    pub feed_id: String,
    pub builds: Vec<String>,
    pub directories: Vec<PathBuf>,
    pub posts: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub pretend: bool,
    pub feeds: Vec<FeedCleanup>,
}

impl CleanupReport {
    pub fn builds_removed(&self) -> usize {
        self.feeds.iter().map(|f| f.builds.len()).sum()
    }

    pub fn posts_removed(&self) -> usize {
        self.feeds.iter().map(|f| f.posts).sum()
    }
}

/// Delete all but the newest `keep` builds of each feed.
pub async fn cleanup(db: &FeedDb, opts: &CleanupOptions) -> Result<CleanupReport, FeedError> {
    if opts.publish_path.is_none() {
        info!("No publish path given, cleaning the store only");
    }
    info!(keep = opts.keep, pretend = opts.pretend, "Cleaning up builds");

    let feed_ids = if opts.feeds.is_empty() {
        db.unique_build_feed_ids()?
    } else {
        opts.feeds.clone()
    };

    let mut report = CleanupReport {
        pretend: opts.pretend,
        feeds: Vec::new(),
    };
    for feed_id in feed_ids {
        report.feeds.push(clean_feed(db, &feed_id, opts).await?);
    }
    info!(
        feeds = report.feeds.len(),
        builds = report.builds_removed(),
        posts = report.posts_removed(),
        "Cleanup finished"
    );
    Ok(report)
}

async fn clean_feed(db: &FeedDb, feed_id: &str, opts: &CleanupOptions) -> Result<FeedCleanup, FeedError> {
    // Newest first
    let builds = db.get_feed_builds(feed_id)?;
    let stale: Vec<_> = builds.into_iter().skip(opts.keep).collect();
    debug!(feed_id, stale = stale.len(), "Removing builds");

    let mut result = FeedCleanup {
        feed_id: feed_id.to_string(),
        builds: stale.iter().map(|b| b.id.clone()).collect(),
        ..Default::default()
    };
    if !opts.pretend {
        db.remove_build_records(&stale)?;
    }

    if let Some(publish) = &opts.publish_path {
        for build in &stale {
            let dir = publish.join(feed_id).join(&build.id);
            if !opts.pretend {
                remove_dir(&dir).await?;
            }
            result.directories.push(dir);
        }
    }

    if opts.posts {
        let posts = db.get_feed_posts(feed_id)?;
        result.posts = posts.len();
        debug!(feed_id, posts = posts.len(), "Removing posts");
        if !opts.pretend {
            db.remove_documents(posts)?;
        }
    }
    Ok(result)
}

async fn remove_dir(dir: &Path) -> Result<(), FeedError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(dir = ?dir, "Build directory already gone");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
