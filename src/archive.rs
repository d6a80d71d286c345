//! Zip packaging of build output
//!
//! Packaging runs on the blocking pool. Concurrent diff packages for the same output
//! path share a single run and all callers see its result.

use crate::build::{BuildDiff, MANIFEST_FILE};
use crate::error::ArchiveError;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

type Packaging = Shared<BoxFuture<'static, Result<(), ArchiveError>>>;

#[derive(Default)]
pub struct Archiver {
    pending: Arc<Mutex<HashMap<PathBuf, (u64, Packaging)>>>,
    next_ticket: AtomicU64,
    runs: Arc<AtomicUsize>,
}

impl Archiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packaging runs started so far.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Zip `files`, or everything, under `content_dir` into `zip_path`.
    pub async fn zip(
        &self,
        zip_path: &Path,
        content_dir: &Path,
        files: Option<Vec<String>>,
    ) -> Result<(), ArchiveError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let (zip_path, content_dir) = (zip_path.to_path_buf(), content_dir.to_path_buf());
        run_blocking(move || {
            let files = match files {
                Some(files) => files,
                None => list_files(&content_dir)?,
            };
            write_zip(&zip_path, &content_dir, &files, None)
        })
        .await
    }

    /// Zip the additions and changes of `diff` plus a manifest listing its deletions.
    pub async fn diff_zip(
        &self,
        zip_path: &Path,
        content_dir: &Path,
        diff: &BuildDiff,
        manifest: &Value,
    ) -> Result<(), ArchiveError> {
        let (ticket, packaging) = {
            let mut pending = self.pending.lock();
            if let Some((ticket, packaging)) = pending.get(zip_path) {
                debug!(zip_path = ?zip_path, "Joining packaging in progress");
                (*ticket, packaging.clone())
            } else {
                let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
                let packaging = self.start_diff(zip_path, content_dir, diff, manifest);
                pending.insert(zip_path.to_path_buf(), (ticket, packaging.clone()));
                (ticket, packaging)
            }
        };

        let result = packaging.await;

        let mut pending = self.pending.lock();
        if pending.get(zip_path).map(|(t, _)| *t) == Some(ticket) {
            pending.remove(zip_path);
        }
        result
    }

    fn start_diff(
        &self,
        zip_path: &Path,
        content_dir: &Path,
        diff: &BuildDiff,
        manifest: &Value,
    ) -> Packaging {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let (zip_path, content_dir) = (zip_path.to_path_buf(), content_dir.to_path_buf());
        let files: Vec<String> = diff
            .packaged_files()
            .into_iter()
            .filter(|f| f != MANIFEST_FILE)
            .collect();
        let mut manifest = manifest.clone();
        if let Value::Object(map) = &mut manifest {
            map.insert("deletions".to_string(), json!(diff.deletions));
        }
        async move {
            info!(zip_path = ?zip_path, files = files.len(), "Packaging build diff");
            run_blocking(move || write_zip(&zip_path, &content_dir, &files, Some(&manifest))).await
        }
        .boxed()
        .shared()
    }
}

async fn run_blocking<F>(f: F) -> Result<(), ArchiveError>
where
    F: FnOnce() -> Result<(), ArchiveError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ArchiveError::Task(e.to_string()))?
}

fn io_error(path: &Path, err: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Files under `root`, relative and sorted.
fn list_files(root: &Path) -> Result<Vec<String>, ArchiveError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| io_error(root, e))?;
        if entry.file_type().is_file() {
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            files.push(
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
            );
        }
    }
    Ok(files)
}

fn write_zip(
    zip_path: &Path,
    content_dir: &Path,
    files: &[String],
    manifest: Option<&Value>,
) -> Result<(), ArchiveError> {
    if let Some(parent) = zip_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let out = File::create(zip_path).map_err(|e| io_error(zip_path, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(out));
    let options = SimpleFileOptions::default();

    for name in files {
        let path = content_dir.join(name);
        let bytes = std::fs::read(&path).map_err(|e| io_error(&path, e))?;
        zip.start_file(name.as_str(), options)
            .map_err(|e| ArchiveError::Zip(e.to_string()))?;
        zip.write_all(&bytes).map_err(|e| io_error(zip_path, e))?;
    }
    if let Some(manifest) = manifest {
        let bytes = serde_json::to_vec(manifest).map_err(|e| ArchiveError::Zip(e.to_string()))?;
        zip.start_file(MANIFEST_FILE, options)
            .map_err(|e| ArchiveError::Zip(e.to_string()))?;
        zip.write_all(&bytes).map_err(|e| io_error(zip_path, e))?;
    }

    let mut out = zip.finish().map_err(|e| ArchiveError::Zip(e.to_string()))?;
    out.flush().map_err(|e| io_error(zip_path, e))?;
    debug!(zip_path = ?zip_path, entries = files.len(), "Wrote zip");
    Ok(())
}
