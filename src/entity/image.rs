//! Lazy image references
//!
//! Images live in an arena owned by the build scope. A resized image is a new node pointing
//! back at its base through an [`ImageId`] plus the resize it has not applied yet. Reading
//! any property walks the chain to its root and asks the image service to apply each resize
//! in order. Nothing is cached, so every resolution calls the service again.

use crate::context::Scope;
use crate::engine::{Deferred, QueueRef};
use crate::entity::{AnyEntity, Entity, FileEntity, WriteTarget};
use crate::error::BuildError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const NAME_TEMPLATE: &str = "{stem}.{format}";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMeta {
    pub mime_type: String,
    pub format: String,
    pub width: u32,
    pub height: u32,
}

/// Bytes and metadata of a resolved image, plus the service URI that names it.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageContent {
    pub uri: String,
    pub data: Vec<u8>,
    pub meta: ImageMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Fit mode understood by the image service, e.g. `cover` or `contain`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Output format, e.g. `png` or `webp`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl ResizeOptions {
    pub fn width(width: u32) -> Self {
        Self {
            width: Some(width),
            ..Default::default()
        }
    }

    pub fn with_height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// External image service
#[async_trait]
pub trait ImageService: Send + Sync {
    /// Register a local file and return its service URI.
    async fn resolve_file(&self, path: &Path) -> Result<String, BuildError>;

    /// Register a remote image and return its service URI.
    async fn resolve_url(&self, url: &str) -> Result<String, BuildError>;

    async fn fetch(&self, uri: &str) -> Result<ImageContent, BuildError>;

    async fn resize(&self, uri: &str, options: &ResizeOptions) -> Result<ImageContent, BuildError>;
}

/// Used when no image service was configured; every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredImageService;

#[async_trait]
impl ImageService for UnconfiguredImageService {
    async fn resolve_file(&self, path: &Path) -> Result<String, BuildError> {
        Err(BuildError::Image(format!("no image service configured for {:?}", path)))
    }

    async fn resolve_url(&self, url: &str) -> Result<String, BuildError> {
        Err(BuildError::Image(format!("no image service configured for {}", url)))
    }

    async fn fetch(&self, uri: &str) -> Result<ImageContent, BuildError> {
        Err(BuildError::Image(format!("no image service configured for {}", uri)))
    }

    async fn resize(&self, uri: &str, _options: &ResizeOptions) -> Result<ImageContent, BuildError> {
        Err(BuildError::Image(format!("no image service configured for {}", uri)))
    }
}

/// Where a root image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    File(PathBuf),
    Url(String),
    /// Already known to the image service
    Uri(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageId(usize);

#[derive(Debug, Clone)]
struct ImageNode {
    id: String,
    stem: String,
    source: Option<ImageSource>,
    base: Option<ImageId>,
    op: Option<ResizeOptions>,
}

/// Image nodes of one build. Bases always precede the nodes derived from them.
#[derive(Debug, Default)]
pub struct ImageArena {
    nodes: RwLock<Vec<ImageNode>>,
}

impl ImageArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    fn add_root(&self, id: String, stem: String, source: ImageSource) -> ImageId {
        let mut nodes = self.nodes.write();
        nodes.push(ImageNode {
            id,
            stem,
            source: Some(source),
            base: None,
            op: None,
        });
        ImageId(nodes.len() - 1)
    }

    fn derive(&self, base: ImageId, op: ResizeOptions) -> ImageId {
        let mut nodes = self.nodes.write();
        let (id, stem) = {
            let node = &nodes[base.0];
            (node.id.clone(), node.stem.clone())
        };
        nodes.push(ImageNode {
            id,
            stem,
            source: None,
            base: Some(base),
            op: Some(op),
        });
        ImageId(nodes.len() - 1)
    }

    fn id_of(&self, image: ImageId) -> String {
        self.nodes.read()[image.0].id.clone()
    }

    fn stem_of(&self, image: ImageId) -> String {
        self.nodes.read()[image.0].stem.clone()
    }

    /// The root source and the resizes to apply to it, oldest first.
    fn chain(&self, image: ImageId) -> Result<(ImageSource, Vec<ResizeOptions>), BuildError> {
        let nodes = self.nodes.read();
        let mut ops = Vec::new();
        let mut current = image;
        loop {
            let node = nodes
                .get(current.0)
                .ok_or_else(|| BuildError::Image(format!("unknown image node {}", current.0)))?;
            if let Some(op) = &node.op {
                ops.push(op.clone());
            }
            match (&node.source, node.base) {
                (Some(source), _) => {
                    ops.reverse();
                    return Ok((source.clone(), ops));
                }
                (None, Some(base)) => current = base,
                (None, None) => {
                    return Err(BuildError::Image(format!("image {} has no source", node.id)))
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct ImageEntity {
    scope: Arc<Scope>,
    queue: QueueRef,
    node: ImageId,
    id: String,
}

impl ImageEntity {
    pub(crate) fn from_source(scope: Arc<Scope>, id: impl Into<String>, source: ImageSource) -> Self {
        let id = id.into();
        let stem = match &source {
            ImageSource::File(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| id.clone()),
            ImageSource::Url(url) | ImageSource::Uri(url) => url_stem(url),
        };
        let node = scope.images.add_root(id.clone(), stem, source);
        Self {
            queue: scope.engine.current(),
            scope,
            node,
            id,
        }
    }

    pub fn handle(&self) -> ImageId {
        self.node
    }

    pub(crate) fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    pub(crate) fn queue(&self) -> QueueRef {
        self.queue
    }

    /// A new image that is this one resized. Nothing is requested until it is resolved.
    pub fn resize(&self, options: ResizeOptions) -> ImageEntity {
        let node = self.scope.images.derive(self.node, options);
        Self {
            scope: self.scope.clone(),
            queue: self.scope.engine.current(),
            node,
            id: self.scope.images.id_of(node),
        }
    }

    /// Queue a write of the resolved image to `target`.
    #[track_caller]
    pub fn write(&self, target: impl Into<WriteTarget>) -> FileEntity {
        FileEntity::wrap(AnyEntity::Image(self.clone()), target.into())
    }

    fn deferred<T, F>(&self, what: &str, f: F) -> Deferred<T>
    where
        T: Send + 'static,
        F: FnOnce(ImageContent) -> T + Send + 'static,
    {
        let resolve = self.resolve_now();
        self.scope
            .engine
            .defer(self.queue, format!("{} {}", what, self.id), async move {
                Ok(f(resolve.await?))
            })
    }

    pub fn meta(&self) -> Deferred<ImageMeta> {
        self.deferred("meta", |c| c.meta)
    }

    pub fn data(&self) -> Deferred<Vec<u8>> {
        self.deferred("data", |c| c.data)
    }

    pub fn data_uri(&self) -> Deferred<String> {
        self.deferred("data-uri", |c| {
            format!("data:{};base64,{}", c.meta.mime_type, BASE64.encode(&c.data))
        })
    }

    pub fn full_uri(&self) -> Deferred<String> {
        self.deferred("uri", |c| c.uri)
    }

    /// URI of the root image, without any resize applied.
    pub fn base_uri(&self) -> Deferred<String> {
        let image = self.clone();
        self.scope
            .engine
            .defer(self.queue, format!("base-uri {}", self.id), async move {
                let (source, _) = image.scope.images.chain(image.node)?;
                image.resolve_source(&source).await
            })
    }

    /// `{stem}.{format}` for the resolved image.
    pub fn name(&self) -> Deferred<String> {
        let image = self.clone();
        self.scope
            .engine
            .defer(self.queue, format!("name {}", self.id), async move {
                let meta = image.resolve_now().await?.meta;
                image.name_for(&meta)
            })
    }

    fn name_for(&self, meta: &ImageMeta) -> Result<String, BuildError> {
        let data = json!({
            "stem": self.scope.images.stem_of(self.node),
            "format": meta.format,
            "width": meta.width,
            "height": meta.height,
            "id": self.id,
        });
        self.scope.renderer.render(NAME_TEMPLATE, &data)
    }

    pub(crate) fn target_path(
        &self,
        target: &WriteTarget,
        meta: &ImageMeta,
    ) -> Result<PathBuf, BuildError> {
        let out = &self.scope.out_root;
        let name = self.name_for(meta)?;
        Ok(match target {
            WriteTarget::Dir(dir) => with_name_unless_file(out.join(dir), &name),
            WriteTarget::Template(t) => {
                let mut data = serde_json::to_value(meta)?;
                if let Some(map) = data.as_object_mut() {
                    map.insert("name".into(), json!(name));
                    map.insert("stem".into(), json!(self.scope.images.stem_of(self.node)));
                    map.insert("id".into(), json!(self.id));
                }
                let rendered = self.scope.renderer.render(t, &data)?;
                with_name_unless_file(out.join(rendered), &name)
            }
            WriteTarget::Exact(path) => with_name_unless_file(out.join(path), &name),
        })
    }

    async fn resolve_source(&self, source: &ImageSource) -> Result<String, BuildError> {
        let service = &self.scope.image_service;
        match source {
            ImageSource::File(path) => service.resolve_file(path).await,
            ImageSource::Url(url) => service.resolve_url(url).await,
            ImageSource::Uri(uri) => Ok(uri.clone()),
        }
    }

    /// Walk to the root and apply every pending resize.
    pub(crate) fn resolve_now(&self) -> BoxFuture<'static, Result<ImageContent, BuildError>> {
        let image = self.clone();
        async move {
            let (source, ops) = image.scope.images.chain(image.node)?;
            let uri = image.resolve_source(&source).await?;
            let service = image.scope.image_service.clone();
            let mut content = match ops.first() {
                None => return service.fetch(&uri).await,
                Some(first) => service.resize(&uri, first).await?,
            };
            for op in ops.iter().skip(1) {
                content = service.resize(&content.uri, op).await?;
            }
            Ok(content)
        }
        .boxed()
    }
}

/// A target that does not end in the image's extension is a directory for it.
fn with_name_unless_file(path: PathBuf, name: &str) -> PathBuf {
    let wanted = Path::new(name).extension();
    if wanted.is_some() && path.extension() == wanted {
        path
    } else {
        path.join(name)
    }
}

fn url_stem(url: &str) -> String {
    let last = url
        .split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').find(|s| !s.is_empty()))
        .unwrap_or("image");
    Path::new(last)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| last.to_string())
}

impl Entity for ImageEntity {
    fn id(&self) -> &str {
        &self.id
    }

    fn locate(&self) -> Deferred<String> {
        self.full_uri()
    }

    fn read(&self) -> Deferred<Vec<u8>> {
        self.data()
    }

    fn typed(&self) -> Deferred<String> {
        self.deferred("type", |c| c.meta.mime_type)
    }
}

impl std::fmt::Debug for ImageEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageEntity")
            .field("id", &self.id)
            .field("node", &self.node)
            .finish()
    }
}
