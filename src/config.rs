use std::fs;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::DatasetError;
use crate::store::{Store, default_data_home};

pub const CONFIG_FILENAME: &str = "mir-datasets.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_home: Option<String>,
    #[serde(default)]
    pub indexes_dir: Option<String>,
    #[serde(default)]
    pub definitions_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub store: Store,
    pub definitions_dir: Utf8PathBuf,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, DatasetError> {
        let config_path = Utf8PathBuf::from(path.unwrap_or(CONFIG_FILENAME));

        if path.is_none() && !config_path.as_std_path().exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| DatasetError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| DatasetError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, DatasetError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let data_home = match config.data_home {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_data_home()?,
        };
        let indexes_dir = config
            .indexes_dir
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| data_home.join("indexes"));
        let definitions_dir = config
            .definitions_dir
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| indexes_dir.clone());

        Ok(ResolvedConfig {
            schema_version,
            store: Store::new_with_paths(data_home, indexes_dir),
            definitions_dir,
        })
    }
}
