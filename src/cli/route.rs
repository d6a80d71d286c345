//! CLI route: run context and the single dispatch table.

use crate::cleanup::{cleanup, CleanupOptions};
use crate::cli::parse::{Commands, ConfigCommands};
use crate::cli::presentation::{
    format_builds_json, format_builds_text, format_cleanup_report, format_queue_json,
    format_queue_text,
};
use crate::config::{ConfigLoader, FeedbuildConfig};
use crate::error::FeedError;
use crate::store::{FeedDb, SledDocumentStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Runtime context for CLI execution: loaded config and the feed store.
pub struct RunContext {
    config: FeedbuildConfig,
    config_path: Option<PathBuf>,
    db: FeedDb,
}

impl RunContext {
    /// Load config (explicit file or workspace layers) and open the store it names.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, FeedError> {
        let mut config = match &config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        if config.workspace_root.is_none() {
            config.workspace_root = Some(workspace_root);
        }

        let store_path = config.resolve(&config.store.path);
        std::fs::create_dir_all(&store_path)?;
        debug!(store = ?store_path, "Opening feed store");
        let db = FeedDb::new(Arc::new(SledDocumentStore::new(&store_path)?));
        db.install_indexes()?;

        Ok(Self {
            config,
            config_path,
            db,
        })
    }

    pub fn config(&self) -> &FeedbuildConfig {
        &self.config
    }

    pub fn db(&self) -> &FeedDb {
        &self.db
    }

    pub async fn execute(&self, command: &Commands) -> Result<String, FeedError> {
        match command {
            Commands::Queue { format } => {
                let queue = self.db.load_build_queue()?;
                if format == "json" {
                    format_queue_json(&queue)
                } else {
                    Ok(format_queue_text(&queue))
                }
            }
            Commands::Builds { feed, format } => {
                let builds = self.db.get_feed_builds(feed)?;
                if format == "json" {
                    format_builds_json(feed, &builds)
                } else {
                    Ok(format_builds_text(feed, &builds))
                }
            }
            Commands::Cleanup {
                feeds,
                keep,
                posts,
                publish,
                pretend,
            } => {
                let opts = CleanupOptions {
                    feeds: feeds.clone(),
                    keep: keep.unwrap_or(self.config.build.retain_builds),
                    posts: *posts,
                    publish_path: publish.then(|| self.config.resolve(&self.config.dirs.publish)),
                    pretend: *pretend,
                };
                let report = cleanup(&self.db, &opts).await?;
                Ok(format_cleanup_report(&report))
            }
            Commands::Config { command } => match command {
                // Loading already validated
                ConfigCommands::Validate => {
                    let source = match &self.config_path {
                        Some(path) => path.display().to_string(),
                        None => "workspace layers".to_string(),
                    };
                    info!(source = %source, "Configuration valid");
                    Ok(format!("Configuration valid ({})", source))
                }
                ConfigCommands::Show => serde_json::to_string_pretty(&self.config)
                    .map_err(|e| FeedError::Store(e.into())),
            },
        }
    }
}
