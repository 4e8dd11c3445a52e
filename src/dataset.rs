use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::download::{
    self, DownloadOptions, DownloadResult, RemoteClient, RemoteHttpClient, RemoteResource,
};
use crate::domain::DEFAULT_VERSION;
use crate::entity::{Entity, Loaders, Multitrack, Record, Track};
use crate::error::DatasetError;
use crate::index::{IndexResolver, VersionTable};
use crate::manifest::{Manifest, SectionKind};
use crate::validate::{self, ValidateOptions, ValidationReport};

pub trait DatasetAccess {
    type Value;

    fn name(&self) -> &str;
    fn track_ids(&self) -> Result<Vec<String>, DatasetError>;
    fn track(&self, id: &str) -> Result<Track<'_, Self::Value>, DatasetError>;
    fn load_tracks(&self) -> Result<BTreeMap<String, Track<'_, Self::Value>>, DatasetError>;
    fn validate(&self, options: &ValidateOptions) -> Result<ValidationReport, DatasetError>;
    fn download(
        &self,
        partial: Option<&[String]>,
        options: &DownloadOptions,
    ) -> Result<DownloadResult, DatasetError>;
}

pub struct Dataset<V> {
    name: String,
    display_name: String,
    version: String,
    root: Utf8PathBuf,
    versions: VersionTable,
    resolver: IndexResolver,
    loaders: Loaders<V>,
    remotes: Vec<RemoteResource>,
    remote_client: Option<Arc<dyn RemoteClient>>,
    license: Option<String>,
    bibtex: Option<String>,
    manifest: OnceLock<Manifest>,
}

impl<V> Dataset<V> {
    pub fn new(
        name: impl Into<String>,
        versions: VersionTable,
        resolver: IndexResolver,
        root: Utf8PathBuf,
    ) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            version: DEFAULT_VERSION.to_string(),
            root,
            versions,
            resolver,
            loaders: Loaders::new(),
            remotes: Vec::new(),
            remote_client: None,
            license: None,
            bibtex: None,
            manifest: OnceLock::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self.manifest = OnceLock::new();
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_loaders(mut self, loaders: Loaders<V>) -> Self {
        self.loaders = loaders;
        self
    }

    pub fn with_remotes(mut self, remotes: Vec<RemoteResource>) -> Self {
        self.remotes = remotes;
        self
    }

    pub fn with_remote_client(mut self, client: Arc<dyn RemoteClient>) -> Self {
        self.remote_client = Some(client);
        self
    }

    pub fn with_citation(mut self, license: Option<String>, bibtex: Option<String>) -> Self {
        self.license = license;
        self.bibtex = bibtex;
        self
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn resolved_version(&self) -> Result<&str, DatasetError> {
        Ok(self.versions.resolve_label(&self.name, &self.version)?.0)
    }

    pub fn versions(&self) -> &VersionTable {
        &self.versions
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn remotes(&self) -> &[RemoteResource] {
        &self.remotes
    }

    pub fn loaders(&self) -> &Loaders<V> {
        &self.loaders
    }

    pub fn license(&self) -> Option<&str> {
        self.license.as_deref()
    }

    pub fn cite(&self) -> Option<&str> {
        self.bibtex.as_deref()
    }

    pub fn manifest(&self) -> Result<&Manifest, DatasetError> {
        if let Some(manifest) = self.manifest.get() {
            return Ok(manifest);
        }
        let manifest = self
            .resolver
            .resolve(&self.name, &self.versions, &self.version, &self.root)?;
        debug!(
            dataset = self.name.as_str(),
            version = manifest.version(),
            tracks = manifest.tracks().len(),
            "index loaded"
        );
        Ok(self.manifest.get_or_init(|| manifest))
    }

    pub fn track_ids(&self) -> Result<Vec<String>, DatasetError> {
        Ok(self.manifest()?.tracks().ids().map(str::to_string).collect())
    }

    pub fn track(&self, id: &str) -> Result<Track<'_, V>, DatasetError> {
        Entity::track(self.manifest()?, id, &self.root, &self.loaders)
    }

    pub fn load_tracks(&self) -> Result<BTreeMap<String, Track<'_, V>>, DatasetError> {
        let manifest = self.manifest()?;
        manifest
            .tracks()
            .ids()
            .map(|id| {
                Entity::track(manifest, id, &self.root, &self.loaders)
                    .map(|track| (id.to_string(), track))
            })
            .collect()
    }

    pub fn multitrack_ids(&self) -> Result<Vec<String>, DatasetError> {
        Ok(self
            .manifest()?
            .multitracks()
            .ids()
            .map(str::to_string)
            .collect())
    }

    pub fn multitrack(&self, id: &str) -> Result<Multitrack<'_, V>, DatasetError> {
        Multitrack::new(self.manifest()?, id, &self.root, &self.loaders)
    }

    pub fn load_multitracks(&self) -> Result<BTreeMap<String, Multitrack<'_, V>>, DatasetError> {
        let manifest = self.manifest()?;
        manifest
            .multitracks()
            .ids()
            .map(|id| {
                Multitrack::new(manifest, id, &self.root, &self.loaders)
                    .map(|multitrack| (id.to_string(), multitrack))
            })
            .collect()
    }

    pub fn record_ids(&self) -> Result<Vec<String>, DatasetError> {
        Ok(self.manifest()?.records().ids().map(str::to_string).collect())
    }

    pub fn record(&self, id: &str) -> Result<Record<'_, V>, DatasetError> {
        Entity::record(self.manifest()?, id, &self.root, &self.loaders)
    }

    pub fn load_records(&self) -> Result<BTreeMap<String, Record<'_, V>>, DatasetError> {
        let manifest = self.manifest()?;
        manifest
            .records()
            .ids()
            .map(|id| {
                Entity::record(manifest, id, &self.root, &self.loaders)
                    .map(|record| (id.to_string(), record))
            })
            .collect()
    }

    pub fn choose_random_track(&self, seed: Option<u64>) -> Result<Track<'_, V>, DatasetError> {
        let ids = self.track_ids()?;
        let id = pick(&ids, seed).ok_or(DatasetError::EmptySection(SectionKind::Track.as_str()))?;
        self.track(id)
    }

    pub fn choose_random_multitrack(
        &self,
        seed: Option<u64>,
    ) -> Result<Multitrack<'_, V>, DatasetError> {
        let ids = self.multitrack_ids()?;
        let id = pick(&ids, seed)
            .ok_or(DatasetError::EmptySection(SectionKind::Multitrack.as_str()))?;
        self.multitrack(id)
    }

    pub fn validate(&self, options: &ValidateOptions) -> Result<ValidationReport, DatasetError> {
        // Resolving a remote index writes its cache under the root.
        if !self.root.as_std_path().is_dir() {
            return Err(DatasetError::RootNotFound(self.root.clone()));
        }
        validate::validate(self.manifest()?, &self.root, options)
    }

    /// Validates after a partial download of `partial`: files only provided by
    /// the other remotes are not reported missing.
    pub fn validate_partial(
        &self,
        partial: &[String],
        options: &ValidateOptions,
    ) -> Result<ValidationReport, DatasetError> {
        let mut options = options.clone();
        options
            .not_requested
            .extend(download::not_requested_keys(&self.remotes, Some(partial))?);
        self.validate(&options)
    }

    pub fn download(
        &self,
        partial: Option<&[String]>,
        options: &DownloadOptions,
    ) -> Result<DownloadResult, DatasetError> {
        let client: Arc<dyn RemoteClient> = match &self.remote_client {
            Some(client) => Arc::clone(client),
            None => Arc::new(RemoteHttpClient::new()?),
        };
        download::download(client.as_ref(), &self.root, &self.remotes, partial, options)
    }
}

impl<V> fmt::Debug for Dataset<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("root", &self.root)
            .field("loaded", &self.manifest.get().is_some())
            .finish()
    }
}

impl<V> DatasetAccess for Dataset<V> {
    type Value = V;

    fn name(&self) -> &str {
        &self.name
    }

    fn track_ids(&self) -> Result<Vec<String>, DatasetError> {
        Dataset::track_ids(self)
    }

    fn track(&self, id: &str) -> Result<Track<'_, V>, DatasetError> {
        Dataset::track(self, id)
    }

    fn load_tracks(&self) -> Result<BTreeMap<String, Track<'_, V>>, DatasetError> {
        Dataset::load_tracks(self)
    }

    fn validate(&self, options: &ValidateOptions) -> Result<ValidationReport, DatasetError> {
        Dataset::validate(self, options)
    }

    fn download(
        &self,
        partial: Option<&[String]>,
        options: &DownloadOptions,
    ) -> Result<DownloadResult, DatasetError> {
        Dataset::download(self, partial, options)
    }
}

fn pick(ids: &[String], seed: Option<u64>) -> Option<&str> {
    if ids.is_empty() {
        return None;
    }
    let mut rng = match seed {
        Some(seed) => fastrand::Rng::with_seed(seed),
        None => fastrand::Rng::new(),
    };
    Some(ids[rng.usize(..ids.len())].as_str())
}
