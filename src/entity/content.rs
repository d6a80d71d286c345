//! In-memory content: raw bytes, templates bound to data, and combined text.

use crate::combiners::CombinerKind;
use crate::context::{BuildContext, Scope};
use crate::engine::{Deferred, QueueRef};
use crate::entity::{AnyEntity, Entity, FileEntity, WriteTarget};
use crate::error::BuildError;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

/// Computes an extra data field when a template is rendered.
pub type Helper =
    Arc<dyn Fn(BuildContext, Value) -> BoxFuture<'static, Result<Value, BuildError>> + Send + Sync>;

const DEFAULT_MIME: &str = "text/html";

/// Data bound to a template.
///
/// Helpers run at render time, inside the commit wave that renders the template, and their
/// results are merged into the data under their key. Anything they queue lands in the
/// following wave.
#[derive(Clone)]
pub struct EvalData {
    pub value: Value,
    helpers: Vec<(String, Helper)>,
    id: Option<String>,
}

impl EvalData {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            helpers: Vec::new(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_helper<F, Fut>(mut self, key: impl Into<String>, helper: F) -> Self
    where
        F: Fn(BuildContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BuildError>> + Send + 'static,
    {
        let helper: Helper = Arc::new(move |cx, data| helper(cx, data).boxed());
        self.helpers.push((key.into(), helper));
        self
    }

    fn field(&self, key: &str) -> Option<String> {
        match self.value.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn mime(&self) -> String {
        self.field("mimeType")
            .unwrap_or_else(|| DEFAULT_MIME.to_string())
    }
}

impl From<Value> for EvalData {
    fn from(value: Value) -> Self {
        EvalData::new(value)
    }
}

impl std::fmt::Debug for EvalData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalData")
            .field("value", &self.value)
            .field("helpers", &self.helpers.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("id", &self.id)
            .finish()
    }
}

#[derive(Clone)]
pub enum TemplateSource {
    Inline(String),
    File(FileEntity),
}

/// Something that produces text for a combiner.
#[derive(Clone)]
pub enum TextSource {
    Text(String),
    File(FileEntity),
    Content(ContentEntity),
}

impl From<&str> for TextSource {
    fn from(s: &str) -> Self {
        TextSource::Text(s.to_string())
    }
}

impl From<FileEntity> for TextSource {
    fn from(f: FileEntity) -> Self {
        TextSource::File(f)
    }
}

impl From<ContentEntity> for TextSource {
    fn from(c: ContentEntity) -> Self {
        TextSource::Content(c)
    }
}

pub enum ContentBody {
    Raw(Vec<u8>),
    Evald {
        template: TemplateSource,
        data: EvalData,
    },
    Combined {
        kind: CombinerKind,
        items: Vec<TextSource>,
    },
}

#[derive(Clone)]
pub struct ContentEntity {
    scope: Arc<Scope>,
    queue: QueueRef,
    id: String,
    name: String,
    mime: String,
    body: Arc<ContentBody>,
}

impl ContentEntity {
    pub(crate) fn raw(
        scope: Arc<Scope>,
        name: impl Into<String>,
        mime: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        let name = name.into();
        Self {
            queue: scope.engine.current(),
            scope,
            id: name.clone(),
            name,
            mime: mime.into(),
            body: Arc::new(ContentBody::Raw(bytes)),
        }
    }

    /// A template bound to data. `position` names items that carry neither name nor id.
    pub(crate) fn evald(
        scope: Arc<Scope>,
        template: TemplateSource,
        data: EvalData,
        position: usize,
    ) -> Self {
        let name = data
            .field("name")
            .or_else(|| data.field("id"))
            .unwrap_or_else(|| format!("item-{}", position));
        let id = data
            .id
            .clone()
            .or_else(|| data.field("id"))
            .unwrap_or_else(|| name.clone());
        Self {
            queue: scope.engine.current(),
            scope,
            id,
            name,
            mime: data.mime(),
            body: Arc::new(ContentBody::Evald { template, data }),
        }
    }

    pub(crate) fn combined(
        scope: Arc<Scope>,
        kind: CombinerKind,
        name: impl Into<String>,
        items: Vec<TextSource>,
    ) -> Self {
        let name = name.into();
        Self {
            queue: scope.engine.current(),
            scope,
            id: name.clone(),
            name,
            mime: kind.mime().to_string(),
            body: Arc::new(ContentBody::Combined { kind, items }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn body(&self) -> &ContentBody {
        &self.body
    }

    pub(crate) fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    pub(crate) fn queue(&self) -> QueueRef {
        self.queue
    }

    /// Queue a write of this content to `target`.
    #[track_caller]
    pub fn write(&self, target: impl Into<WriteTarget>) -> FileEntity {
        FileEntity::wrap(AnyEntity::Content(self.clone()), target.into())
    }

    fn metadata(&self) -> Value {
        json!({"id": self.id, "name": self.name, "mimeType": self.mime})
    }

    pub(crate) fn target_path(&self, target: &WriteTarget) -> Result<PathBuf, BuildError> {
        let out = &self.scope.out_root;
        Ok(match target {
            WriteTarget::Dir(dir) => out.join(dir).join(&self.name),
            WriteTarget::Template(t) => out.join(self.scope.renderer.render(t, &self.metadata())?),
            WriteTarget::Exact(path) => out.join(path),
        })
    }

    pub(crate) fn render_now(&self) -> BoxFuture<'static, Result<Vec<u8>, BuildError>> {
        let content = self.clone();
        async move {
            match &*content.body {
                ContentBody::Raw(bytes) => Ok(bytes.clone()),
                ContentBody::Evald { template, data } => {
                    let template = match template {
                        TemplateSource::Inline(text) => text.clone(),
                        TemplateSource::File(file) => into_text(file.read_now().await?, file.id())?,
                    };
                    let mut value = data.value.clone();
                    for (key, helper) in &data.helpers {
                        let cx = BuildContext::from_scope(content.scope.clone());
                        let computed = helper(cx, data.value.clone()).await?;
                        match &mut value {
                            Value::Object(map) => {
                                map.insert(key.clone(), computed);
                            }
                            _ => {
                                return Err(BuildError::Template(format!(
                                    "helper {} needs object data for {}",
                                    key, content.id
                                )))
                            }
                        }
                    }
                    Ok(content.scope.renderer.render(&template, &value)?.into_bytes())
                }
                ContentBody::Combined { kind, items } => {
                    let mut texts = Vec::with_capacity(items.len());
                    for item in items {
                        texts.push(match item {
                            TextSource::Text(text) => text.clone(),
                            TextSource::File(file) => into_text(file.read_now().await?, file.id())?,
                            TextSource::Content(c) => into_text(c.render_now().await?, c.id())?,
                        });
                    }
                    Ok(kind.combine(&texts).into_bytes())
                }
            }
        }
        .boxed()
    }
}

fn into_text(bytes: Vec<u8>, id: &str) -> Result<String, BuildError> {
    String::from_utf8(bytes).map_err(|e| BuildError::InvalidData(format!("{} is not UTF-8: {}", id, e)))
}

impl Entity for ContentEntity {
    fn id(&self) -> &str {
        &self.id
    }

    fn locate(&self) -> Deferred<String> {
        Deferred::ready(self.name.clone())
    }

    fn read(&self) -> Deferred<Vec<u8>> {
        self.scope
            .engine
            .defer(self.queue, format!("render {}", self.id), self.render_now())
    }

    fn typed(&self) -> Deferred<String> {
        Deferred::ready(self.mime.clone())
    }
}

impl std::fmt::Debug for ContentEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentEntity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mime", &self.mime)
            .finish()
    }
}
