use std::cell::OnceCell;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::DatasetError;
use crate::manifest::{FileMap, Manifest, SectionKind};

/// Parses the file at an absolute path. Must return `Ok(None)` when the file
/// does not exist and an error only when it exists but cannot be parsed.
pub type LoadFn<V> = Arc<dyn Fn(&Utf8Path) -> Result<Option<V>, DatasetError> + Send + Sync>;

/// A value computed at most once from a path by a bound loader.
///
/// Successful results (including `None`) are cached; errors are not, so a
/// later call retries the load.
pub struct Memo<T> {
    path: Option<Utf8PathBuf>,
    loader: LoadFn<T>,
    value: OnceCell<Option<T>>,
}

impl<T> Memo<T> {
    pub fn new(path: Option<Utf8PathBuf>, loader: LoadFn<T>) -> Self {
        Self {
            path,
            loader,
            value: OnceCell::new(),
        }
    }

    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        self.value.get().is_some()
    }

    pub fn get(&self) -> Result<Option<&T>, DatasetError> {
        if let Some(value) = self.value.get() {
            return Ok(value.as_ref());
        }
        let loaded = match &self.path {
            Some(path) => (self.loader)(path)?,
            None => None,
        };
        Ok(self.value.get_or_init(|| loaded).as_ref())
    }
}

impl<T: fmt::Debug> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("path", &self.path)
            .field("value", &self.value.get())
            .finish()
    }
}

pub struct Loaders<V> {
    by_key: Vec<(String, LoadFn<V>)>,
}

impl<V> Default for Loaders<V> {
    fn default() -> Self {
        Self { by_key: Vec::new() }
    }
}

impl<V> Clone for Loaders<V> {
    fn clone(&self) -> Self {
        Self {
            by_key: self.by_key.clone(),
        }
    }
}

impl<V> Loaders<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, key: impl Into<String>, loader: F) -> Self
    where
        F: Fn(&Utf8Path) -> Result<Option<V>, DatasetError> + Send + Sync + 'static,
    {
        self.register(key, loader);
        self
    }

    pub fn register<F>(&mut self, key: impl Into<String>, loader: F)
    where
        F: Fn(&Utf8Path) -> Result<Option<V>, DatasetError> + Send + Sync + 'static,
    {
        let key = key.into();
        let loader: LoadFn<V> = Arc::new(loader);
        match self.by_key.iter_mut().find(|(name, _)| *name == key) {
            Some(slot) => slot.1 = loader,
            None => self.by_key.push((key, loader)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&LoadFn<V>> {
        self.by_key
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, loader)| loader)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_key.iter().map(|(key, _)| key.as_str())
    }
}

enum Slot<V> {
    Bound(Memo<V>),
    Unbound(Option<Utf8PathBuf>),
}

impl<V> Slot<V> {
    fn path(&self) -> Option<&Utf8Path> {
        match self {
            Slot::Bound(memo) => memo.path(),
            Slot::Unbound(path) => path.as_deref(),
        }
    }
}

pub struct Entity<'a, V> {
    kind: SectionKind,
    id: String,
    root: &'a Utf8Path,
    files: &'a FileMap,
    fields: Vec<(&'a str, Slot<V>)>,
}

pub type Track<'a, V> = Entity<'a, V>;
pub type Record<'a, V> = Entity<'a, V>;

impl<'a, V> Entity<'a, V> {
    pub fn track(
        manifest: &'a Manifest,
        id: &str,
        root: &'a Utf8Path,
        loaders: &Loaders<V>,
    ) -> Result<Self, DatasetError> {
        let files = manifest.track(id).ok_or_else(|| DatasetError::UnknownId {
            kind: SectionKind::Track.as_str(),
            id: id.to_string(),
            valid: manifest.tracks().ids().map(str::to_string).collect(),
        })?;
        Ok(Self::bind(SectionKind::Track, id, root, files, loaders))
    }

    pub fn record(
        manifest: &'a Manifest,
        id: &str,
        root: &'a Utf8Path,
        loaders: &Loaders<V>,
    ) -> Result<Self, DatasetError> {
        let files = manifest.record(id).ok_or_else(|| DatasetError::UnknownId {
            kind: SectionKind::Record.as_str(),
            id: id.to_string(),
            valid: manifest.records().ids().map(str::to_string).collect(),
        })?;
        Ok(Self::bind(SectionKind::Record, id, root, files, loaders))
    }

    fn bind(
        kind: SectionKind,
        id: &str,
        root: &'a Utf8Path,
        files: &'a FileMap,
        loaders: &Loaders<V>,
    ) -> Self {
        let fields = files
            .iter()
            .map(|(key, entry)| {
                let path = entry.map(|entry| root.join(&entry.path));
                let slot = match loaders.get(key) {
                    Some(loader) => Slot::Bound(Memo::new(path, Arc::clone(loader))),
                    None => Slot::Unbound(path),
                };
                (key, slot)
            })
            .collect();
        Self {
            kind,
            id: id.to_string(),
            root,
            files,
            fields,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> SectionKind {
        self.kind
    }

    pub fn root(&self) -> &Utf8Path {
        self.root
    }

    pub fn files(&self) -> &'a FileMap {
        self.files
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(key, _)| *key)
    }

    pub fn path(&self, key: &str) -> Result<Option<&Utf8Path>, DatasetError> {
        Ok(self.slot(key)?.path())
    }

    pub fn value(&self, key: &str) -> Result<Option<&V>, DatasetError> {
        match self.slot(key)? {
            Slot::Bound(memo) => memo.get(),
            Slot::Unbound(None) => Ok(None),
            Slot::Unbound(Some(_)) => Err(DatasetError::NoLoader {
                key: key.to_string(),
            }),
        }
    }

    pub fn is_loaded(&self, key: &str) -> bool {
        matches!(self.slot(key), Ok(Slot::Bound(memo)) if memo.is_loaded())
    }

    fn slot(&self, key: &str) -> Result<&Slot<V>, DatasetError> {
        self.fields
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, slot)| slot)
            .ok_or_else(|| DatasetError::UnknownField {
                id: self.id.clone(),
                key: key.to_string(),
                valid: self.keys().map(str::to_string).collect(),
            })
    }
}

impl<V> fmt::Debug for Entity<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("root", &self.root)
            .field("keys", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct Multitrack<'a, V> {
    entity: Entity<'a, V>,
    members: &'a [String],
    manifest: &'a Manifest,
    loaders: &'a Loaders<V>,
}

impl<'a, V> Multitrack<'a, V> {
    pub fn new(
        manifest: &'a Manifest,
        id: &str,
        root: &'a Utf8Path,
        loaders: &'a Loaders<V>,
    ) -> Result<Self, DatasetError> {
        let entry = manifest
            .multitrack(id)
            .ok_or_else(|| DatasetError::UnknownId {
                kind: SectionKind::Multitrack.as_str(),
                id: id.to_string(),
                valid: manifest.multitracks().ids().map(str::to_string).collect(),
            })?;
        Ok(Self {
            entity: Entity::bind(SectionKind::Multitrack, id, root, &entry.files, loaders),
            members: &entry.tracks,
            manifest,
            loaders,
        })
    }

    pub fn track_ids(&self) -> &'a [String] {
        self.members
    }

    pub fn track(&self, id: &str) -> Result<Track<'a, V>, DatasetError> {
        if !self.members.iter().any(|member| member == id) {
            return Err(DatasetError::UnknownId {
                kind: "multitrack member",
                id: id.to_string(),
                valid: self.members.to_vec(),
            });
        }
        Entity::track(self.manifest, id, self.entity.root, self.loaders)
    }

    pub fn tracks(&self) -> Result<Vec<Track<'a, V>>, DatasetError> {
        self.members.iter().map(|id| self.track(id)).collect()
    }
}

impl<V> fmt::Debug for Multitrack<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multitrack")
            .field("entity", &self.entity)
            .field("tracks", &self.members)
            .finish()
    }
}

impl<'a, V> Deref for Multitrack<'a, V> {
    type Target = Entity<'a, V>;

    fn deref(&self) -> &Self::Target {
        &self.entity
    }
}
