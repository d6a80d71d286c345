//! File entities: local paths, remote URLs, and generated content or images written to
//! the output tree.

use crate::context::Scope;
use crate::engine::fileops::{self, TransferKind};
use crate::engine::{Deferred, QueueRef};
use crate::entity::{
    mime_for, relative_href, AnyEntity, ContentEntity, Entity, ImageEntity, WriteTarget,
};
use crate::error::BuildError;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resolved output path, filled once the write has run.
type WrittenSlot = Arc<RwLock<Option<PathBuf>>>;

#[derive(Clone)]
pub enum FileKind {
    /// A path on disk. Updated in place when a copy or move settles on its final target.
    Local { path: Arc<RwLock<PathBuf>> },
    Remote { url: String },
    Content {
        content: ContentEntity,
        target: WriteTarget,
        written: WrittenSlot,
    },
    Image {
        image: ImageEntity,
        target: WriteTarget,
        written: WrittenSlot,
    },
}

#[derive(Clone)]
pub struct FileEntity {
    scope: Arc<Scope>,
    queue: QueueRef,
    id: String,
    kind: FileKind,
}

impl FileEntity {
    pub(crate) fn local(scope: Arc<Scope>, id: impl Into<String>, path: PathBuf) -> Self {
        let queue = scope.engine.current();
        Self {
            scope,
            queue,
            id: id.into(),
            kind: FileKind::Local {
                path: Arc::new(RwLock::new(path)),
            },
        }
    }

    pub(crate) fn remote(scope: Arc<Scope>, url: impl Into<String>) -> Self {
        let url = url.into();
        let queue = scope.engine.current();
        Self {
            scope,
            queue,
            id: url.clone(),
            kind: FileKind::Remote { url },
        }
    }

    /// Place `entity` at `target` in the output tree and queue the write.
    #[track_caller]
    pub fn wrap(entity: AnyEntity, target: WriteTarget) -> FileEntity {
        Self::wrap_from(entity, target, std::panic::Location::caller().to_string())
    }

    pub(crate) fn wrap_from(entity: AnyEntity, target: WriteTarget, caller: String) -> FileEntity {
        match entity {
            AnyEntity::File(file) => {
                let dest = file.scope.out_root.join(match &target {
                    WriteTarget::Dir(p) | WriteTarget::Exact(p) => p.clone(),
                    WriteTarget::Template(t) => PathBuf::from(t),
                });
                file.transfer(TransferKind::Copy, dest, caller)
            }
            AnyEntity::Content(content) => {
                let file = FileEntity {
                    scope: content.scope().clone(),
                    queue: content.scope().engine.current(),
                    id: content.id().to_string(),
                    kind: FileKind::Content {
                        content: content.clone(),
                        target,
                        written: Arc::new(RwLock::new(None)),
                    },
                };
                file.queue_write(content.queue(), caller);
                file
            }
            AnyEntity::Image(image) => {
                let file = FileEntity {
                    scope: image.scope().clone(),
                    queue: image.scope().engine.current(),
                    id: image.id().to_string(),
                    kind: FileKind::Image {
                        image: image.clone(),
                        target,
                        written: Arc::new(RwLock::new(None)),
                    },
                };
                file.queue_write(image.queue(), caller);
                file
            }
        }
    }

    pub fn kind(&self) -> &FileKind {
        &self.kind
    }

    pub(crate) fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    /// Copy this file to `dest` once the queue runs. The result keeps this file's id.
    pub(crate) fn transfer(&self, kind: TransferKind, dest: PathBuf, caller: String) -> FileEntity {
        let target = Arc::new(RwLock::new(dest.clone()));
        let result = FileEntity {
            scope: self.scope.clone(),
            queue: self.scope.engine.current(),
            id: self.id.clone(),
            kind: FileKind::Local {
                path: target.clone(),
            },
        };

        let source = self.clone();
        let label = format!("{} {} -> {}", kind.name(), self.id, dest.display());
        let _handle: Deferred<()> = self.scope.engine.defer(self.queue, label, async move {
            let written = match &source.kind {
                FileKind::Remote { url } => {
                    let bytes = source.read_now().await?;
                    let dest = remote_target(url, &dest).await;
                    fileops::write_bytes(&dest, &bytes)
                        .await
                        .map_err(|cause| BuildError::FileOp {
                            op: kind.name(),
                            from: PathBuf::from(url),
                            to: dest.clone(),
                            caller: caller.clone(),
                            cause: Box::new(cause),
                        })?;
                    dest
                }
                _ => {
                    let from = source.path_now().await?;
                    fileops::transfer(kind, &from, &dest, &source.scope.in_root, &caller).await?
                }
            };
            *target.write() = written;
            Ok(())
        });
        result
    }

    fn queue_write(&self, bound: QueueRef, caller: String) {
        let file = self.clone();
        let label = format!("write {}", self.id);
        let _handle: Deferred<()> = self.scope.engine.defer(bound, label, async move {
            file.write_now().await.map(|_| ()).map_err(|cause| BuildError::Write {
                target: file.target_description(),
                caller,
                cause: Box::new(cause),
            })
        });
    }

    fn target_description(&self) -> String {
        match &self.kind {
            FileKind::Local { path } => path.read().display().to_string(),
            FileKind::Remote { url } => url.clone(),
            FileKind::Content { target, .. } | FileKind::Image { target, .. } => target.describe(),
        }
    }

    /// Render the wrapped entity and write it to its resolved path.
    fn write_now(&self) -> BoxFuture<'static, Result<PathBuf, BuildError>> {
        let file = self.clone();
        async move {
            let (bytes, path, written) = match &file.kind {
                FileKind::Content {
                    content,
                    target,
                    written,
                } => {
                    let path = content.target_path(target)?;
                    (content.render_now().await?, path, written.clone())
                }
                FileKind::Image {
                    image,
                    target,
                    written,
                } => {
                    let resolved = image.resolve_now().await?;
                    let path = image.target_path(target, &resolved.meta)?;
                    (resolved.data, path, written.clone())
                }
                FileKind::Local { path } => return Ok(path.read().clone()),
                FileKind::Remote { url } => {
                    return Err(BuildError::InvalidData(format!(
                        "{} is remote and has no output path",
                        url
                    )))
                }
            };
            fileops::write_bytes(&path, &bytes).await?;
            *written.write() = Some(path.clone());
            Ok(path)
        }
        .boxed()
    }

    /// Filesystem path, resolving a generated file's target if it has not been written yet.
    pub(crate) fn path_now(&self) -> BoxFuture<'static, Result<PathBuf, BuildError>> {
        let file = self.clone();
        async move {
            match &file.kind {
                FileKind::Local { path } => Ok(path.read().clone()),
                FileKind::Remote { url } => Err(BuildError::InvalidData(format!(
                    "{} is remote and has no local path",
                    url
                ))),
                FileKind::Content {
                    content,
                    target,
                    written,
                } => {
                    let cached = written.read().clone();
                    match cached {
                        Some(path) => Ok(path),
                        None => content.target_path(target),
                    }
                }
                FileKind::Image {
                    image,
                    target,
                    written,
                } => {
                    let cached = written.read().clone();
                    if let Some(path) = cached {
                        return Ok(path);
                    }
                    let meta = image.resolve_now().await?.meta;
                    image.target_path(target, &meta)
                }
            }
        }
        .boxed()
    }

    fn locate_now(&self) -> BoxFuture<'static, Result<String, BuildError>> {
        let file = self.clone();
        async move {
            match &file.kind {
                FileKind::Remote { url } => Ok(url.clone()),
                _ => Ok(file.path_now().await?.display().to_string()),
            }
        }
        .boxed()
    }

    pub(crate) fn read_now(&self) -> BoxFuture<'static, Result<Vec<u8>, BuildError>> {
        let file = self.clone();
        async move {
            match &file.kind {
                FileKind::Local { path } => {
                    let path = path.read().clone();
                    tokio::fs::read(&path)
                        .await
                        .map_err(|e| BuildError::io(path, e))
                }
                FileKind::Remote { url } => {
                    Ok(file.scope.http.get(url, None).await?.into_bytes()?)
                }
                FileKind::Content { content, .. } => content.render_now().await,
                FileKind::Image { image, .. } => Ok(image.resolve_now().await?.data),
            }
        }
        .boxed()
    }

    /// Path of this file relative to the directory of `from`.
    pub fn href(&self, from: impl AsRef<Path>) -> Deferred<String> {
        let from = self.scope.out_root.join(from.as_ref());
        let file = self.clone();
        self.scope
            .engine
            .defer(self.queue, format!("href {}", self.id), async move {
                let to = file.path_now().await?;
                Ok(relative_href(&from, &to))
            })
    }
}

impl Entity for FileEntity {
    fn id(&self) -> &str {
        &self.id
    }

    fn locate(&self) -> Deferred<String> {
        self.scope
            .engine
            .defer(self.queue, format!("locate {}", self.id), self.locate_now())
    }

    fn read(&self) -> Deferred<Vec<u8>> {
        self.scope
            .engine
            .defer(self.queue, format!("read {}", self.id), self.read_now())
    }

    fn typed(&self) -> Deferred<String> {
        let file = self.clone();
        self.scope
            .engine
            .defer(self.queue, format!("type {}", self.id), async move {
                match &file.kind {
                    FileKind::Content { content, .. } => Ok(content.mime().to_string()),
                    FileKind::Image { image, .. } => Ok(image.resolve_now().await?.meta.mime_type),
                    _ => Ok(mime_for(&file.locate_now().await?).to_string()),
                }
            })
    }
}

impl std::fmt::Debug for FileEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileEntity")
            .field("id", &self.id)
            .field("target", &self.target_description())
            .finish()
    }
}

/// Where a downloaded file lands: inside `dest` when it is a directory.
async fn remote_target(url: &str, dest: &Path) -> PathBuf {
    let is_dir = tokio::fs::metadata(dest)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return dest.to_path_buf();
    }
    let name = url
        .split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').find(|s| !s.is_empty()))
        .unwrap_or("download");
    dest.join(name)
}
