//! Config loading entry points.

use super::merge::merge_policy;
use super::sources::{global_file, workspace_file};
use super::FeedbuildConfig;
use crate::error::FeedError;
use config::{Environment, File};
use std::path::Path;
use tracing::debug;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace: defaults, global file, workspace files,
    /// then `FEEDBUILD__SECTION__KEY` environment overrides.
    pub fn load(workspace_root: &Path) -> Result<FeedbuildConfig, FeedError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = builder.add_source(Self::environment());

        let mut config: FeedbuildConfig = builder.build()?.try_deserialize()?;
        if config.workspace_root.is_none() {
            config.workspace_root = Some(workspace_root.to_path_buf());
        }
        Self::validated(config)
    }

    /// Load configuration from one explicit file, still honoring environment overrides.
    pub fn load_from_file(path: &Path) -> Result<FeedbuildConfig, FeedError> {
        if !path.exists() {
            return Err(FeedError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let config: FeedbuildConfig = merge_policy::builder_with_defaults()?
            .add_source(File::from(path))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()?;
        Self::validated(config)
    }

    fn environment() -> Environment {
        Environment::with_prefix("FEEDBUILD")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    fn validated(config: FeedbuildConfig) -> Result<FeedbuildConfig, FeedError> {
        config.validate().map_err(|errors| {
            let joined = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            FeedError::ConfigError(joined)
        })?;
        debug!(workspace_root = ?config.workspace_root, "Configuration loaded");
        Ok(config)
    }
}
