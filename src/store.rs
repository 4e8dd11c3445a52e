use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use tempfile::Builder;

use crate::error::DatasetError;

pub const DATA_HOME_ENV: &str = "MIR_DATASETS_DIR";

pub const INDEX_CACHE_DIR: &str = "mir_datasets_indexes";

#[derive(Debug, Clone)]
pub struct Store {
    data_home: Utf8PathBuf,
    indexes_dir: Utf8PathBuf,
}

impl Store {
    pub fn new_with_paths(data_home: Utf8PathBuf, indexes_dir: Utf8PathBuf) -> Self {
        Self {
            data_home,
            indexes_dir,
        }
    }

    pub fn data_home(&self) -> &Utf8Path {
        &self.data_home
    }

    pub fn indexes_dir(&self) -> &Utf8Path {
        &self.indexes_dir
    }

    pub fn dataset_root(&self, display_name: &str) -> Utf8PathBuf {
        self.data_home.join(display_name)
    }

    pub fn index_cache_dir(root: &Utf8Path) -> Utf8PathBuf {
        root.join(INDEX_CACHE_DIR)
    }

    pub fn index_cache_path(root: &Utf8Path, filename: &str) -> Utf8PathBuf {
        Self::index_cache_dir(root).join(filename)
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), DatasetError> {
        fs::create_dir_all(path.as_std_path())
            .map_err(|err| DatasetError::Filesystem(format!("create {path}: {err}")))
    }

    /// Writes `content` to a temp file beside `path`, then renames it into place.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), DatasetError> {
        let parent = path
            .parent()
            .ok_or_else(|| DatasetError::Filesystem("invalid destination path".to_string()))?;
        Self::ensure_dir(parent)?;
        let mut temp = Builder::new()
            .prefix(".mir-ds")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| DatasetError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| DatasetError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| DatasetError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

pub fn default_data_home() -> Result<Utf8PathBuf, DatasetError> {
    if let Ok(dir) = std::env::var(DATA_HOME_ENV) {
        if !dir.trim().is_empty() {
            return Ok(Utf8PathBuf::from(dir.trim()));
        }
    }
    BaseDirs::new()
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.home_dir().join("mir_datasets")).ok())
        .ok_or_else(|| DatasetError::Filesystem("unable to resolve data home".to_string()))
}
