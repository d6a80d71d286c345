//! Filesystem primitives behind `cp`, `mv` and `write`.

use crate::error::BuildError;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Copy,
    Move,
}

impl TransferKind {
    pub fn name(self) -> &'static str {
        match self {
            TransferKind::Copy => "cp",
            TransferKind::Move => "mv",
        }
    }
}

/// Copy or move `from` to `to`, returning the path that was written.
///
/// - A directory source needs an existing directory destination.
/// - An existing directory destination receives `basename(from)`.
/// - Otherwise `to` is the target and its parent is created.
///
/// Moves out of `in_root` copy instead. Errors carry `caller`, the call site that queued
/// the operation.
pub async fn transfer(
    kind: TransferKind,
    from: &Path,
    to: &Path,
    in_root: &Path,
    caller: &str,
) -> Result<PathBuf, BuildError> {
    transfer_inner(kind, from, to, in_root)
        .await
        .map_err(|cause| BuildError::FileOp {
            op: kind.name(),
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            caller: caller.to_string(),
            cause: Box::new(cause),
        })
}

async fn transfer_inner(
    kind: TransferKind,
    from: &Path,
    to: &Path,
    in_root: &Path,
) -> Result<PathBuf, BuildError> {
    let source = fs::metadata(from).await.map_err(|e| BuildError::io(from, e))?;
    let dest_is_dir = match fs::metadata(to).await {
        Ok(meta) => meta.is_dir(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(BuildError::io(to, e)),
    };

    if source.is_dir() && !dest_is_dir {
        return Err(BuildError::NotADirectory {
            op: kind.name(),
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
    }

    let target = if dest_is_dir {
        let name = from
            .file_name()
            .ok_or_else(|| BuildError::InvalidData(format!("{:?} has no file name", from)))?;
        to.join(name)
    } else {
        to.to_path_buf()
    };

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| BuildError::io(parent, e))?;
    }

    let canonical = fs::canonicalize(from).await.map_err(|e| BuildError::io(from, e))?;
    let kind = if kind == TransferKind::Move && canonical.starts_with(in_root) {
        debug!(from = ?from, "Source is an input, copying instead of moving");
        TransferKind::Copy
    } else {
        kind
    };

    match kind {
        TransferKind::Copy if source.is_dir() => copy_tree(from, &target).await?,
        TransferKind::Copy => {
            fs::copy(from, &target)
                .await
                .map_err(|e| BuildError::io(from, e))?;
        }
        TransferKind::Move => relocate(from, &target, source.is_dir()).await?,
    }

    Ok(target)
}

/// Rename `from` to `to`, creating `to`'s parent. `to` must not exist.
pub async fn move_tree(from: &Path, to: &Path) -> Result<(), BuildError> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| BuildError::io(parent, e))?;
    }
    let is_dir = fs::metadata(from)
        .await
        .map_err(|e| BuildError::io(from, e))?
        .is_dir();
    relocate(from, to, is_dir).await
}

async fn relocate(from: &Path, to: &Path, is_dir: bool) -> Result<(), BuildError> {
    let Err(rename_err) = fs::rename(from, to).await else {
        return Ok(());
    };
    // Crossing filesystems; fall back to copy and delete.
    debug!(from = ?from, error = %rename_err, "Rename failed, copying");
    if is_dir {
        copy_tree(from, to).await?;
        fs::remove_dir_all(from)
            .await
            .map_err(|e| BuildError::io(from, e))
    } else {
        fs::copy(from, to).await.map_err(|e| BuildError::io(from, e))?;
        fs::remove_file(from).await.map_err(|e| BuildError::io(from, e))
    }
}

async fn copy_tree(from: &Path, to: &Path) -> Result<(), BuildError> {
    let (src, dest) = (from.to_path_buf(), to.to_path_buf());
    tokio::task::spawn_blocking(move || copy_tree_blocking(&src, &dest))
        .await
        .map_err(|e| BuildError::script(format!("copy task failed: {}", e)))?
        .map_err(|e| BuildError::io(from, e))
}

fn copy_tree_blocking(from: &Path, to: &Path) -> io::Result<()> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Write `bytes` to `path`, creating parent directories first.
pub async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), BuildError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| BuildError::io(parent, e))?;
    }
    fs::write(path, bytes).await.map_err(|e| BuildError::io(path, e))
}

/// Remove `path` if present and recreate it empty.
pub async fn reset_dir(path: &Path) -> Result<(), BuildError> {
    match fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(BuildError::io(path, e)),
    }
    fs::create_dir_all(path)
        .await
        .map_err(|e| BuildError::io(path, e))
}
