//! Build context: the entry point of build scripts.

use crate::combiners::CombinerKind;
use crate::config::HttpConfig;
use crate::context::Scope;
use crate::engine::index::{is_url, DirectoryIndex, EntryKind};
use crate::engine::template::{PlaceholderRenderer, TemplateRenderer};
use crate::engine::{CommitReport, Engine, WaveMode};
use crate::entity::{
    Collection, ContentEntity, Contents, Entity, EvalData, FileEntity, FileKind, Files, ImageArena,
    ImageEntity, ImageService, ImageSource, Images, TemplateSource, TextSource,
    UnconfiguredImageService, WriteTarget,
};
use crate::error::BuildError;
use crate::http::{HttpFetch, ReqwestFetcher};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A reference to input files
#[derive(Clone)]
pub enum Ref {
    /// Glob over the input tree; `./` anchors it at the root
    Glob(String),
    Url(String),
    File(FileEntity),
}

impl From<&str> for Ref {
    fn from(s: &str) -> Self {
        if is_url(s) {
            Ref::Url(s.to_string())
        } else {
            Ref::Glob(s.to_string())
        }
    }
}

impl From<String> for Ref {
    fn from(s: String) -> Self {
        Ref::from(s.as_str())
    }
}

impl From<FileEntity> for Ref {
    fn from(f: FileEntity) -> Self {
        Ref::File(f)
    }
}

/// One or more references
#[derive(Clone, Default)]
pub struct Refs(pub Vec<Ref>);

impl From<Ref> for Refs {
    fn from(r: Ref) -> Self {
        Refs(vec![r])
    }
}

impl From<&str> for Refs {
    fn from(s: &str) -> Self {
        Refs(vec![Ref::from(s)])
    }
}

impl From<String> for Refs {
    fn from(s: String) -> Self {
        Refs(vec![Ref::from(s)])
    }
}

impl From<FileEntity> for Refs {
    fn from(f: FileEntity) -> Self {
        Refs(vec![Ref::File(f)])
    }
}

impl From<Vec<&str>> for Refs {
    fn from(v: Vec<&str>) -> Self {
        Refs(v.into_iter().map(Ref::from).collect())
    }
}

impl From<Vec<Ref>> for Refs {
    fn from(v: Vec<Ref>) -> Self {
        Refs(v)
    }
}

impl From<&Files> for Refs {
    fn from(files: &Files) -> Self {
        Refs(files.iter().cloned().map(Ref::File).collect())
    }
}

pub struct BuildContextBuilder {
    in_root: PathBuf,
    out_root: PathBuf,
    data: Value,
    mode: WaveMode,
    image_service: Option<Arc<dyn ImageService>>,
    renderer: Option<Arc<dyn TemplateRenderer>>,
    http: Option<Arc<dyn HttpFetch>>,
}

impl BuildContextBuilder {
    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn mode(mut self, mode: WaveMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn image_service(mut self, service: Arc<dyn ImageService>) -> Self {
        self.image_service = Some(service);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn http(mut self, http: Arc<dyn HttpFetch>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<BuildContext, BuildError> {
        let in_root = self
            .in_root
            .canonicalize()
            .map_err(|e| BuildError::io(&self.in_root, e))?;
        std::fs::create_dir_all(&self.out_root).map_err(|e| BuildError::io(&self.out_root, e))?;
        let out_root = self
            .out_root
            .canonicalize()
            .map_err(|e| BuildError::io(&self.out_root, e))?;
        let index = DirectoryIndex::build(&in_root)?;
        debug!(in_root = ?in_root, out_root = ?out_root, entries = index.len(), "Opened build context");

        let http = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestFetcher::new(&HttpConfig::default())?),
        };

        Ok(BuildContext {
            scope: Arc::new(Scope {
                engine: Engine::new(self.mode),
                in_root,
                out_root,
                index,
                images: ImageArena::new(),
                image_service: self
                    .image_service
                    .unwrap_or_else(|| Arc::new(UnconfiguredImageService)),
                renderer: self.renderer.unwrap_or_else(|| Arc::new(PlaceholderRenderer)),
                http,
                data: self.data,
            }),
        })
    }
}

/// Handle to one build. Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct BuildContext {
    scope: Arc<Scope>,
}

impl BuildContext {
    pub fn builder(in_root: impl Into<PathBuf>, out_root: impl Into<PathBuf>) -> BuildContextBuilder {
        BuildContextBuilder {
            in_root: in_root.into(),
            out_root: out_root.into(),
            data: Value::Null,
            mode: WaveMode::default(),
            image_service: None,
            renderer: None,
            http: None,
        }
    }

    pub(crate) fn from_scope(scope: Arc<Scope>) -> Self {
        Self { scope }
    }

    pub fn in_root(&self) -> &Path {
        &self.scope.in_root
    }

    pub fn out_root(&self) -> &Path {
        &self.scope.out_root
    }

    /// Data the build was opened with.
    pub fn data(&self) -> &Value {
        &self.scope.data
    }

    /// Resolve references to files. Overlapping globs yield each path once.
    pub fn files(&self, refs: impl Into<Refs>) -> Result<Files, BuildError> {
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        for r in refs.into().0 {
            match r {
                Ref::Glob(glob) => {
                    for (path, _) in self.scope.index.search(&glob)? {
                        let id = self.input_id(&path);
                        if seen.insert(id.clone()) {
                            items.push(FileEntity::local(self.scope.clone(), id, path));
                        }
                    }
                }
                Ref::Url(url) => items.push(FileEntity::remote(self.scope.clone(), url)),
                Ref::File(file) => items.push(file),
            }
        }
        Collection::new(items)
    }

    /// The first file a reference resolves to.
    pub fn file(&self, r: impl Into<Ref>) -> Result<FileEntity, BuildError> {
        let r = r.into();
        let label = match &r {
            Ref::Glob(s) | Ref::Url(s) => s.clone(),
            Ref::File(f) => format!("{:?}", f),
        };
        self.files(r)?
            .into_vec()
            .into_iter()
            .next()
            .ok_or(BuildError::NotFound(label))
    }

    /// Copy input files into `dest` under the output root.
    #[track_caller]
    pub fn cp(&self, refs: impl Into<Refs>, dest: impl AsRef<Path>) -> Result<Files, BuildError> {
        Ok(self.files(refs)?.cp(dest))
    }

    /// Resolve references to images. Directories are skipped.
    pub fn images(&self, refs: impl Into<Refs>) -> Result<Images, BuildError> {
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        for r in refs.into().0 {
            match r {
                Ref::Glob(glob) => {
                    for (path, kind) in self.scope.index.search(&glob)? {
                        if kind != EntryKind::File {
                            continue;
                        }
                        let id = self.input_id(&path);
                        if seen.insert(id.clone()) {
                            items.push(ImageEntity::from_source(
                                self.scope.clone(),
                                id,
                                ImageSource::File(path),
                            ));
                        }
                    }
                }
                Ref::Url(url) => items.push(ImageEntity::from_source(
                    self.scope.clone(),
                    url.clone(),
                    ImageSource::Url(url),
                )),
                Ref::File(file) => {
                    let source = match file.kind() {
                        FileKind::Remote { url } => ImageSource::Url(url.clone()),
                        FileKind::Local { path } => ImageSource::File(path.read().clone()),
                        _ => {
                            return Err(BuildError::InvalidData(format!(
                                "{:?} is generated and cannot be used as an image source",
                                file
                            )))
                        }
                    };
                    items.push(ImageEntity::from_source(
                        self.scope.clone(),
                        file.id().to_string(),
                        source,
                    ));
                }
            }
        }
        Collection::new(items)
    }

    /// Write input images to `target` unchanged.
    #[track_caller]
    pub fn images_to(
        &self,
        refs: impl Into<Refs>,
        target: impl Into<WriteTarget>,
    ) -> Result<Files, BuildError> {
        Ok(self.images(refs)?.write(target))
    }

    /// Bind a template file to each data item.
    pub fn eval(
        &self,
        template: impl Into<Ref>,
        items: Vec<EvalData>,
    ) -> Result<Contents, BuildError> {
        let template = self.file(template)?;
        self.bind(TemplateSource::File(template), items)
    }

    /// Bind an inline template to each data item.
    pub fn render(&self, template: &str, items: Vec<EvalData>) -> Result<Contents, BuildError> {
        self.bind(TemplateSource::Inline(template.to_string()), items)
    }

    fn bind(&self, template: TemplateSource, items: Vec<EvalData>) -> Result<Contents, BuildError> {
        let contents = items
            .into_iter()
            .enumerate()
            .map(|(i, data)| ContentEntity::evald(self.scope.clone(), template.clone(), data, i))
            .collect();
        Collection::new(contents)
    }

    /// Serialize `value` as a JSON content item named `name`.
    pub fn json(&self, name: &str, value: &Value, pretty: bool) -> Result<ContentEntity, BuildError> {
        let bytes = if pretty {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };
        Ok(ContentEntity::raw(
            self.scope.clone(),
            name,
            "application/json",
            bytes,
        ))
    }

    /// Write `value` as JSON to exactly `filename` under the output root.
    #[track_caller]
    pub fn json_to(&self, value: &Value, filename: &str, pretty: bool) -> Result<FileEntity, BuildError> {
        let name = Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.to_string());
        Ok(self
            .json(&name, value, pretty)?
            .write(WriteTarget::exact(filename)))
    }

    /// Fold text sources into one content item.
    pub fn combine(&self, kind: CombinerKind, name: &str, items: Vec<TextSource>) -> ContentEntity {
        ContentEntity::combined(self.scope.clone(), kind, name, items)
    }

    /// Run queued operations until no wave produces more.
    pub async fn commit(&self) -> Result<CommitReport, BuildError> {
        self.scope.engine.commit().await
    }

    pub fn pending_operations(&self) -> usize {
        self.scope.engine.pending()
    }

    fn input_id(&self, path: &Path) -> String {
        path.strip_prefix(&self.scope.in_root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }
}
