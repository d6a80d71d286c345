//! Entities and collections
//!
//! An entity is something a build script can place in the output tree: a file on disk or
//! behind a URL, a piece of generated content, or an image held by the image service.
//! Every accessor returns a [`Deferred`] so it follows the engine's queue rules.

pub mod collection;
pub mod content;
pub mod file;
pub mod image;

pub use collection::{Collection, Contents, Files, Images};
pub use content::{ContentBody, ContentEntity, EvalData, Helper, TemplateSource, TextSource};
pub use file::{FileEntity, FileKind};
pub use image::{
    ImageArena, ImageContent, ImageEntity, ImageId, ImageMeta, ImageService, ImageSource,
    ResizeOptions, UnconfiguredImageService,
};

use crate::engine::template::is_template;
use crate::engine::Deferred;
use std::path::{Component, Path, PathBuf};

/// Capabilities shared by every entity kind.
pub trait Entity {
    /// Identifier, unique within a collection.
    fn id(&self) -> &str;

    /// Path, URL or name of the entity.
    fn locate(&self) -> Deferred<String>;

    /// Raw bytes.
    fn read(&self) -> Deferred<Vec<u8>>;

    /// MIME type.
    fn typed(&self) -> Deferred<String>;
}

/// Any entity
#[derive(Clone)]
pub enum AnyEntity {
    File(FileEntity),
    Content(ContentEntity),
    Image(ImageEntity),
}

impl Entity for AnyEntity {
    fn id(&self) -> &str {
        match self {
            AnyEntity::File(e) => e.id(),
            AnyEntity::Content(e) => e.id(),
            AnyEntity::Image(e) => e.id(),
        }
    }

    fn locate(&self) -> Deferred<String> {
        match self {
            AnyEntity::File(e) => e.locate(),
            AnyEntity::Content(e) => e.locate(),
            AnyEntity::Image(e) => e.locate(),
        }
    }

    fn read(&self) -> Deferred<Vec<u8>> {
        match self {
            AnyEntity::File(e) => e.read(),
            AnyEntity::Content(e) => e.read(),
            AnyEntity::Image(e) => e.read(),
        }
    }

    fn typed(&self) -> Deferred<String> {
        match self {
            AnyEntity::File(e) => e.typed(),
            AnyEntity::Content(e) => e.typed(),
            AnyEntity::Image(e) => e.typed(),
        }
    }
}

impl From<FileEntity> for AnyEntity {
    fn from(e: FileEntity) -> Self {
        AnyEntity::File(e)
    }
}

impl From<ContentEntity> for AnyEntity {
    fn from(e: ContentEntity) -> Self {
        AnyEntity::Content(e)
    }
}

impl From<ImageEntity> for AnyEntity {
    fn from(e: ImageEntity) -> Self {
        AnyEntity::Image(e)
    }
}

/// Where a generated entity is written, relative to the output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteTarget {
    /// `dir/<entity name>`
    Dir(PathBuf),
    /// A path template rendered against the entity's metadata
    Template(String),
    /// Exactly this path
    Exact(PathBuf),
}

impl WriteTarget {
    pub fn exact(path: impl Into<PathBuf>) -> Self {
        WriteTarget::Exact(path.into())
    }

    pub fn describe(&self) -> String {
        match self {
            WriteTarget::Dir(p) | WriteTarget::Exact(p) => p.display().to_string(),
            WriteTarget::Template(t) => t.clone(),
        }
    }
}

impl From<&str> for WriteTarget {
    fn from(s: &str) -> Self {
        if is_template(s) {
            WriteTarget::Template(s.to_string())
        } else {
            WriteTarget::Dir(PathBuf::from(s))
        }
    }
}

impl From<String> for WriteTarget {
    fn from(s: String) -> Self {
        WriteTarget::from(s.as_str())
    }
}

impl From<&Path> for WriteTarget {
    fn from(p: &Path) -> Self {
        WriteTarget::Dir(p.to_path_buf())
    }
}

impl From<PathBuf> for WriteTarget {
    fn from(p: PathBuf) -> Self {
        WriteTarget::Dir(p)
    }
}

/// MIME type for a file name, by extension.
pub fn mime_for(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "text/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

/// `to` expressed relative to the directory containing `from`.
pub fn relative_href(from: &Path, to: &Path) -> String {
    let base: Vec<Component> = from
        .parent()
        .map(|p| p.components().collect())
        .unwrap_or_default();
    let target: Vec<Component> = to.components().collect();
    let shared = base
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    for _ in shared..base.len() {
        parts.push("..".to_string());
    }
    for component in &target[shared..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }
    parts.join("/")
}
