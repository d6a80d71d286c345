//! Feed builds
//!
//! Running a feed's build script over its stored data, checksumming the output tree,
//! deciding whether anything changed since the last build and, if so, recording and
//! publishing the result.

pub mod builder;
pub mod manifest;
pub mod record;

pub use builder::{BuildOutcome, Builder, FeedBuilder};
pub use manifest::{generate_manifest, serialize_manifest_meta, ManifestMetaFn, MANIFEST_FILE};
pub use record::{checksum_tree, has_new_content, BuildDiff, BuildRecord, FileSum, FileSums};

use crate::config::DirsConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Options attached to a build request.
///
/// Two requests coalesce only when their options compare equal, so unknown keys are kept
/// in `extra` and take part in the comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    /// Record and publish the build when it has new content
    #[serde(default = "default_save_build")]
    pub save_build: bool,

    /// Overrides the output root for this build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_path: Option<PathBuf>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_save_build() -> bool {
    true
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            save_build: default_save_build(),
            build_path: None,
            extra: Map::new(),
        }
    }
}

impl BuildOptions {
    /// Options for a trial build that writes only a manifest.
    pub fn dry_run() -> Self {
        Self {
            save_build: false,
            ..Self::default()
        }
    }
}

/// Directory layout of one feed's builds
#[derive(Debug, Clone)]
pub struct BuildPaths {
    pub output_root: PathBuf,
    pub publish_root: PathBuf,
}

impl BuildPaths {
    pub fn new(dirs: &DirsConfig, build_path: Option<&Path>, feed_id: &str) -> Self {
        let output = build_path.unwrap_or(&dirs.output);
        Self {
            output_root: output.join(feed_id),
            publish_root: dirs.publish.join(feed_id),
        }
    }

    pub fn output_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.output_root.join(path)
    }

    /// Root of a published build
    pub fn build_root(&self, build_id: &str) -> PathBuf {
        self.publish_root.join(build_id)
    }

    pub fn content(&self, build_id: &str) -> PathBuf {
        self.build_root(build_id).join("content")
    }

    pub fn content_zip(&self, build_id: &str) -> PathBuf {
        self.build_root(build_id).join("content.zip")
    }

    /// Zip of the changes between build `since` and `build_id`
    pub fn since_zip(&self, since: &str, build_id: &str) -> PathBuf {
        self.build_root(build_id)
            .join(format!("{}-content.zip", since))
    }
}
