//! Ordered collections of entities with unique ids.

use crate::engine::fileops::TransferKind;
use crate::entity::{
    AnyEntity, ContentEntity, Entity, FileEntity, ImageEntity, ResizeOptions, WriteTarget,
};
use crate::error::BuildError;
use std::collections::HashMap;
use std::path::Path;

#[derive(Clone)]
pub struct Collection<E> {
    items: Vec<E>,
    ids: HashMap<String, usize>,
}

pub type Files = Collection<FileEntity>;
pub type Contents = Collection<ContentEntity>;
pub type Images = Collection<ImageEntity>;

impl<E: Entity> Collection<E> {
    /// Build a collection, rejecting duplicate ids.
    pub fn new(items: Vec<E>) -> Result<Self, BuildError> {
        let mut ids = HashMap::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            if ids.insert(item.id().to_string(), i).is_some() {
                return Err(BuildError::DuplicateId(item.id().to_string()));
            }
        }
        Ok(Self { items, ids })
    }

    /// For items mapped one-to-one from a collection whose ids were already unique.
    fn mapped<S>(source: &Collection<S>, f: impl FnMut(&S) -> E) -> Self {
        Self {
            items: source.items.iter().map(f).collect(),
            ids: source.ids.clone(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&E> {
        self.ids.get(id).map(|&i| &self.items[i])
    }

    pub fn require(&self, id: &str) -> Result<&E, BuildError> {
        self.get(id)
            .ok_or_else(|| BuildError::NotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.items.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.id())
    }

    pub fn first(&self) -> Option<&E> {
        self.items.first()
    }

    pub fn into_vec(self) -> Vec<E> {
        self.items
    }
}

impl<E: Entity + Clone + Into<AnyEntity>> Collection<E> {
    pub fn to_any(&self) -> Vec<AnyEntity> {
        self.items.iter().cloned().map(Into::into).collect()
    }
}

impl<'a, E> IntoIterator for &'a Collection<E> {
    type Item = &'a E;
    type IntoIter = std::slice::Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl Files {
    /// Copy every file into `dest` (relative to the output root).
    #[track_caller]
    pub fn cp(&self, dest: impl AsRef<Path>) -> Files {
        self.transfer(TransferKind::Copy, dest.as_ref())
    }

    /// Move every file into `dest`. Inputs are copied instead.
    #[track_caller]
    pub fn mv(&self, dest: impl AsRef<Path>) -> Files {
        self.transfer(TransferKind::Move, dest.as_ref())
    }

    #[track_caller]
    fn transfer(&self, kind: TransferKind, dest: &Path) -> Files {
        let caller = std::panic::Location::caller().to_string();
        Files::mapped(self, |file| {
            let dest = file.scope().out_root.join(dest);
            file.transfer(kind, dest, caller.clone())
        })
    }
}

impl Contents {
    /// Write every item to `target`: a directory, or a path template per item.
    #[track_caller]
    pub fn write(&self, target: impl Into<WriteTarget>) -> Files {
        let target = target.into();
        let caller = std::panic::Location::caller();
        Files::mapped(self, |content| {
            wrap_at(AnyEntity::Content(content.clone()), target.clone(), caller)
        })
    }
}

impl Images {
    pub fn resize(&self, options: ResizeOptions) -> Images {
        Images::mapped(self, |image| image.resize(options.clone()))
    }

    /// Resize and write in one step.
    #[track_caller]
    pub fn resize_to(&self, options: ResizeOptions, target: impl Into<WriteTarget>) -> Files {
        let caller = std::panic::Location::caller();
        let target = target.into();
        Files::mapped(self, |image| {
            wrap_at(AnyEntity::Image(image.resize(options.clone())), target.clone(), caller)
        })
    }

    #[track_caller]
    pub fn write(&self, target: impl Into<WriteTarget>) -> Files {
        let target = target.into();
        let caller = std::panic::Location::caller();
        Files::mapped(self, |image| {
            wrap_at(AnyEntity::Image(image.clone()), target.clone(), caller)
        })
    }
}

/// Wrap with the location of the collection call rather than this helper.
fn wrap_at(
    entity: AnyEntity,
    target: WriteTarget,
    caller: &'static std::panic::Location<'static>,
) -> FileEntity {
    FileEntity::wrap_from(entity, target, caller.to_string())
}
