//! Runs feed builds

use crate::archive::Archiver;
use crate::build::manifest::{generate_manifest, MANIFEST_FILE};
use crate::build::record::{checksum_tree, has_new_content, BuildDiff, BuildRecord, FileSums};
use crate::build::{BuildOptions, BuildPaths};
use crate::clock::Clock;
use crate::config::DirsConfig;
use crate::context::BuildContext;
use crate::engine::fileops::{move_tree, reset_dir, write_bytes};
use crate::engine::template::TemplateRenderer;
use crate::engine::WaveMode;
use crate::entity::ImageService;
use crate::error::{BuildError, FeedError};
use crate::feed::Feed;
use crate::http::HttpFetch;
use crate::store::FeedDb;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of one build
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutcome {
    pub feed_id: String,
    /// Set when a build record was created
    pub build_id: Option<String>,
    pub new_content: bool,
    pub files: FileSums,
}

/// Something that can build a feed
#[async_trait]
pub trait FeedBuilder: Send + Sync {
    async fn build_feed(&self, feed: &Feed, opts: &BuildOptions) -> Result<BuildOutcome, FeedError>;
}

pub struct Builder {
    db: FeedDb,
    dirs: DirsConfig,
    wave_mode: WaveMode,
    http: Arc<dyn HttpFetch>,
    image_service: Option<Arc<dyn ImageService>>,
    renderer: Option<Arc<dyn TemplateRenderer>>,
    archiver: Archiver,
    clock: Clock,
}

impl Builder {
    pub fn new(db: FeedDb, dirs: DirsConfig, http: Arc<dyn HttpFetch>, clock: Clock) -> Self {
        Self {
            db,
            dirs,
            wave_mode: WaveMode::default(),
            http,
            image_service: None,
            renderer: None,
            archiver: Archiver::new(),
            clock,
        }
    }

    pub fn with_wave_mode(mut self, mode: WaveMode) -> Self {
        self.wave_mode = mode;
        self
    }

    pub fn with_image_service(mut self, service: Arc<dyn ImageService>) -> Self {
        self.image_service = Some(service);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn archiver(&self) -> &Archiver {
        &self.archiver
    }

    pub fn paths(&self, feed_id: &str, opts: &BuildOptions) -> BuildPaths {
        BuildPaths::new(&self.dirs, opts.build_path.as_deref(), feed_id)
    }

    async fn build_data(&self, feed_id: &str) -> Result<Value, FeedError> {
        let record = self.db.get_feed_record(feed_id)?;
        let posts: Vec<Value> = self
            .db
            .get_feed_posts(feed_id)?
            .into_iter()
            .map(|doc| Value::Object(doc.body))
            .collect();
        Ok(json!({ "record": record.body, "posts": posts }))
    }

    async fn run_script(&self, feed: &Feed, paths: &BuildPaths, data: Value) -> Result<Value, BuildError> {
        let mut builder = BuildContext::builder(&feed.in_path, &paths.output_root)
            .data(data)
            .mode(self.wave_mode)
            .http(self.http.clone());
        if let Some(service) = &self.image_service {
            builder = builder.image_service(service.clone());
        }
        if let Some(renderer) = &self.renderer {
            builder = builder.renderer(renderer.clone());
        }
        let cx = builder.build()?;

        let meta = feed.build.build(&cx)?;
        let report = cx.commit().await?;
        debug!(
            feed_id = %feed.id,
            waves = report.waves,
            ops = report.operations,
            "Build script committed"
        );
        Ok(meta)
    }

    async fn publish(
        &self,
        feed: &Feed,
        paths: &BuildPaths,
        record: &BuildRecord,
    ) -> Result<(), FeedError> {
        let manifest = generate_manifest(&feed.manifest_meta, record, None);
        let manifest_path = paths.output_path(MANIFEST_FILE);
        debug!(feed_id = %feed.id, path = ?manifest_path, "Writing build manifest");
        write_bytes(&manifest_path, &serde_json::to_vec(&manifest).map_err(BuildError::from)?).await?;

        let content = paths.content(&record.id);
        debug!(feed_id = %feed.id, path = ?content, "Moving build to publish directory");
        move_tree(&paths.output_root, &content).await?;

        let zip_path = paths.content_zip(&record.id);
        self.archiver.zip(&zip_path, &content, None).await?;
        Ok(())
    }

    /// Forget a build whose publish step failed, so the same tree counts as new next time.
    async fn discard_build(&self, paths: &BuildPaths, record: &BuildRecord) {
        if let Err(err) = self.db.remove_build_records(std::slice::from_ref(record)) {
            error!(feed_id = %record.feed_id, build_id = %record.id, error = %err, "Failed to remove build record");
        }
        let dir = paths.build_root(&record.id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(build_id = %record.id, dir = ?dir, "Removed partial publish directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(build_id = %record.id, dir = ?dir, error = %e, "Failed to remove partial publish directory"),
        }
    }

    /// Package what changed between build `since` and the feed's latest build.
    pub async fn package_since(&self, feed: &Feed, since: &str) -> Result<PathBuf, FeedError> {
        let builds = self.db.get_feed_builds(&feed.id)?;
        let latest = builds
            .first()
            .ok_or_else(|| BuildError::NotFound(format!("builds of {}", feed.id)))?;
        let base = builds
            .iter()
            .find(|b| b.id == since)
            .ok_or_else(|| BuildError::NotFound(format!("build {} of {}", since, feed.id)))?;

        let paths = self.paths(&feed.id, &BuildOptions::default());
        let zip_path = paths.since_zip(since, &latest.id);
        let diff = BuildDiff::between(&base.files, &latest.files);
        let manifest = generate_manifest(&feed.manifest_meta, latest, Some(since));
        self.archiver
            .diff_zip(&zip_path, &paths.content(&latest.id), &diff, &manifest)
            .await?;
        Ok(zip_path)
    }
}

#[async_trait]
impl FeedBuilder for Builder {
    async fn build_feed(&self, feed: &Feed, opts: &BuildOptions) -> Result<BuildOutcome, FeedError> {
        let feed_id = feed.id.as_str();
        info!(feed_id, "Starting build");

        let data = self.build_data(feed_id).await?;
        let previous = match self.db.latest_build(feed_id) {
            Ok(previous) => previous,
            Err(err) => {
                error!(feed_id, error = %err, "Failed to load previous build");
                None
            }
        };

        let paths = self.paths(feed_id, opts);
        reset_dir(&paths.output_root).await?;

        let meta = match self.run_script(feed, &paths, data).await {
            Ok(meta) => meta,
            Err(err) => {
                error!(feed_id, error = %err, "Build script failed");
                return Err(err.into());
            }
        };

        let root = paths.output_root.clone();
        let files = tokio::task::spawn_blocking(move || checksum_tree(&root))
            .await
            .map_err(|e| BuildError::script(format!("checksum task failed: {}", e)))??;

        let new_content = has_new_content(&files, &meta, previous.as_ref());
        let mut outcome = BuildOutcome {
            feed_id: feed_id.to_string(),
            build_id: None,
            new_content,
            files: files.clone(),
        };

        if opts.save_build && new_content {
            info!(feed_id, files = files.len(), "Saving new content");
            let record = BuildRecord::next(feed_id, self.clock.now(), previous.as_ref(), files, meta);
            let record = self.db.create_build_record(&record)?;
            if let Err(err) = self.publish(feed, &paths, &record).await {
                error!(feed_id, build_id = %record.id, error = %err, "Build failure");
                self.discard_build(&paths, &record).await;
                return Err(err);
            }
            info!(feed_id, build_id = %record.id, seq = record.seq, "Build complete");
            outcome.build_id = Some(record.id);
        } else if !opts.save_build {
            let record = BuildRecord::next(feed_id, self.clock.now(), previous.as_ref(), files, meta);
            let manifest = generate_manifest(&feed.manifest_meta, &record, None);
            let manifest_path = paths.output_path(MANIFEST_FILE);
            debug!(feed_id, path = ?manifest_path, "Writing build manifest");
            write_bytes(&manifest_path, &serde_json::to_vec(&manifest).map_err(BuildError::from)?)
                .await?;
        } else {
            info!(feed_id, "No new content");
        }

        if !outcome.new_content && previous.is_none() {
            warn!(feed_id, "Build produced no output");
        }
        Ok(outcome)
    }
}
