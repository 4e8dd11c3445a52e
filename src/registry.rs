use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::Dataset;
use crate::download::{RemoteClient, RemoteHttpClient, RemoteResource};
use crate::error::DatasetError;
use crate::index::{
    IndexClient, IndexHttpClient, IndexResolver, IndexSource, VersionTable, index_filename,
};
use crate::loaders::{Annotation, FieldKind, annotation_loaders};
use crate::store::Store;

#[derive(Clone)]
pub struct Context {
    pub store: Store,
    pub index_client: Arc<dyn IndexClient>,
    pub remote_client: Arc<dyn RemoteClient>,
}

impl Context {
    pub fn new(store: Store) -> Result<Self, DatasetError> {
        Ok(Self {
            store,
            index_client: Arc::new(IndexHttpClient::new()?),
            remote_client: Arc::new(RemoteHttpClient::new()?),
        })
    }

    pub fn with_clients(
        store: Store,
        index_client: Arc<dyn IndexClient>,
        remote_client: Arc<dyn RemoteClient>,
    ) -> Self {
        Self {
            store,
            index_client,
            remote_client,
        }
    }

    pub fn resolver(&self) -> IndexResolver {
        IndexResolver::new(
            self.store.indexes_dir().to_path_buf(),
            Arc::clone(&self.index_client),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub version: Option<String>,
    pub root: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub default: String,
    pub test: String,
    pub versions: BTreeMap<String, IndexSource>,
    #[serde(default)]
    pub remotes: Vec<RemoteResource>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldKind>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub bibtex: Option<String>,
}

impl DatasetDefinition {
    pub fn from_path(path: &Utf8Path) -> Result<Self, DatasetError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| DatasetError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| DatasetError::InvalidDefinition(format!("{path}: {err}")))
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn version_table(&self) -> Result<VersionTable, DatasetError> {
        VersionTable::new(
            self.default.clone(),
            self.test.clone(),
            self.versions
                .iter()
                .map(|(label, source)| {
                    let mut source = source.clone();
                    if source.filename.is_empty() {
                        source.filename = index_filename(&self.name, label);
                    }
                    (label.clone(), source)
                })
                .collect(),
        )
    }

    pub fn build(
        &self,
        context: &Context,
        options: &InitOptions,
    ) -> Result<Dataset<Annotation>, DatasetError> {
        let root = options
            .root
            .clone()
            .unwrap_or_else(|| context.store.dataset_root(self.display_name()));
        let mut dataset = Dataset::new(&self.name, self.version_table()?, context.resolver(), root)
            .with_display_name(self.display_name())
            .with_loaders(annotation_loaders(
                self.fields.iter().map(|(key, kind)| (key.as_str(), *kind)),
            ))
            .with_remotes(self.remotes.clone())
            .with_remote_client(Arc::clone(&context.remote_client))
            .with_citation(self.license.clone(), self.bibtex.clone());
        if let Some(version) = &options.version {
            dataset = dataset.with_version(version.clone());
        }
        Ok(dataset)
    }
}

pub type DatasetFactory<V> =
    Arc<dyn Fn(&Context, &InitOptions) -> Result<Dataset<V>, DatasetError> + Send + Sync>;

pub struct DatasetRegistry<V> {
    context: Context,
    factories: BTreeMap<String, DatasetFactory<V>>,
}

impl<V> DatasetRegistry<V> {
    pub fn new(context: Context) -> Self {
        Self {
            context,
            factories: BTreeMap::new(),
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Context, &InitOptions) -> Result<Dataset<V>, DatasetError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn list_datasets(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn initialize(&self, name: &str, options: &InitOptions) -> Result<Dataset<V>, DatasetError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| DatasetError::UnknownDataset {
                name: name.to_string(),
                valid: self.list_datasets(),
            })?;
        factory(&self.context, options)
    }
}

impl DatasetRegistry<Annotation> {
    pub fn register_definition(&mut self, definition: DatasetDefinition) -> Result<(), DatasetError> {
        definition.version_table()?;
        for remote in &definition.remotes {
            remote.check_paths()?;
        }
        let name = definition.name.clone();
        self.register(name, move |context: &Context, options: &InitOptions| {
            definition.build(context, options)
        });
        Ok(())
    }

    pub fn load_definitions(&mut self, dir: &Utf8Path) -> Result<usize, DatasetError> {
        if !dir.as_std_path().is_dir() {
            return Ok(0);
        }
        let mut paths = Vec::new();
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| DatasetError::Filesystem(format!("read {dir}: {err}")))?;
        for entry in entries {
            let entry = entry.map_err(|err| DatasetError::Filesystem(err.to_string()))?;
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };
            let is_definition = path.extension() == Some("json")
                && !path.file_name().is_some_and(|name| name.contains("_index_"));
            if path.is_file() && is_definition {
                paths.push(path);
            }
        }
        paths.sort();
        for path in &paths {
            debug!(path = %path, "loading dataset definition");
            self.register_definition(DatasetDefinition::from_path(path)?)?;
        }
        Ok(paths.len())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    struct NoIndex;

    impl IndexClient for NoIndex {
        fn fetch_index(&self, _url: &str) -> Result<Vec<u8>, DatasetError> {
            Err(DatasetError::RemoteHttp("offline".to_string()))
        }
    }

    struct NoRemote;

    impl RemoteClient for NoRemote {
        fn download(&self, _url: &str, _destination: &std::path::Path) -> Result<(), DatasetError> {
            Err(DatasetError::RemoteHttp("offline".to_string()))
        }
    }

    fn context() -> Context {
        Context::with_clients(
            Store::new_with_paths(Utf8PathBuf::from("/data"), Utf8PathBuf::from("/indexes")),
            Arc::new(NoIndex),
            Arc::new(NoRemote),
        )
    }

    const DEFINITION: &str = r#"{
        "name": "beatles",
        "display_name": "Beatles",
        "default": "1.2",
        "test": "1.2",
        "versions": {"1.2": {"filename": "beatles_index_1.2.json"}},
        "fields": {"beats": "tsv"},
        "license": "CC BY-NC-SA"
    }"#;

    #[test]
    fn definition_builds_dataset() {
        let definition: DatasetDefinition = serde_json::from_str(DEFINITION).unwrap();
        let dataset = definition.build(&context(), &InitOptions::default()).unwrap();
        assert_eq!(dataset.root(), Utf8Path::new("/data/Beatles"));
        assert_eq!(dataset.resolved_version().unwrap(), "1.2");
        assert_eq!(dataset.license(), Some("CC BY-NC-SA"));
        assert!(dataset.loaders().get("beats").is_some());
    }

    #[test]
    fn registry_lists_and_initializes() {
        let mut registry = DatasetRegistry::new(context());
        registry
            .register_definition(serde_json::from_str(DEFINITION).unwrap())
            .unwrap();
        assert_eq!(registry.list_datasets(), vec!["beatles"]);

        let options = InitOptions {
            version: Some("test".to_string()),
            root: Some(Utf8PathBuf::from("/elsewhere")),
        };
        let dataset = registry.initialize("beatles", &options).unwrap();
        assert_eq!(dataset.root(), Utf8Path::new("/elsewhere"));
        assert_eq!(dataset.version(), "test");

        assert_matches!(
            registry.initialize("salami", &InitOptions::default()),
            Err(DatasetError::UnknownDataset { .. })
        );
    }

    #[test]
    fn index_filename_defaults_to_convention() {
        let definition: DatasetDefinition = serde_json::from_str(
            r#"{"name": "salami", "default": "2.0", "test": "2.0", "versions": {"2.0": {}}}"#,
        )
        .unwrap();
        let table = definition.version_table().unwrap();
        let (_, source) = table.resolve_label("salami", "default").unwrap();
        assert_eq!(source.filename, "salami_index_2.0.json");
    }

    #[test]
    fn escaping_remote_destination_is_rejected() {
        let mut definition: DatasetDefinition = serde_json::from_str(DEFINITION).unwrap();
        definition.remotes = serde_json::from_str(
            r#"[{"key": "audio", "filename": "audio.zip", "url": "https://example.org/audio.zip",
                 "checksum": "00", "destination": "../../outside"}]"#,
        )
        .unwrap();
        let mut registry = DatasetRegistry::new(context());
        assert_matches!(
            registry.register_definition(definition),
            Err(DatasetError::InvalidDefinition(message)) if message.contains("destination")
        );
        assert!(registry.list_datasets().is_empty());
    }

    #[test]
    fn invalid_definition_is_rejected() {
        let mut definition: DatasetDefinition = serde_json::from_str(DEFINITION).unwrap();
        definition.default = "9.9".to_string();
        let mut registry = DatasetRegistry::new(context());
        assert_matches!(
            registry.register_definition(definition),
            Err(DatasetError::InvalidDefinition(_))
        );
    }
}
