use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::Path;
use std::thread;
use std::time::Duration;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use chrono::Utc;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tempfile::Builder;
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::checksum::md5_file;
use crate::domain::{ArchiveKind, Checksum};
use crate::error::DatasetError;
use crate::fs_util::{extract_tar, extract_zip, is_contained};
use crate::index::{http_client, is_retryable_error, is_retryable_status};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteResource {
    pub key: String,
    pub filename: String,
    pub url: String,
    pub checksum: Checksum,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveKind>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub file_keys: Vec<String>,
}

impl RemoteResource {
    pub fn archive_kind(&self) -> ArchiveKind {
        self.archive
            .unwrap_or_else(|| ArchiveKind::from_filename(&self.filename))
    }

    pub fn check_paths(&self) -> Result<(), DatasetError> {
        let mut components = Utf8Path::new(&self.filename).components();
        let bare = matches!(
            (components.next(), components.next()),
            (Some(Utf8Component::Normal(_)), None)
        );
        if !bare {
            return Err(DatasetError::InvalidDefinition(format!(
                "remote {}: filename `{}` must be a bare file name",
                self.key, self.filename
            )));
        }
        if let Some(dir) = &self.destination
            && !is_contained(Utf8Path::new(dir))
        {
            return Err(DatasetError::InvalidDefinition(format!(
                "remote {}: destination `{dir}` must stay inside the dataset root",
                self.key
            )));
        }
        Ok(())
    }
}

pub fn select_remotes<'a>(
    remotes: &'a [RemoteResource],
    partial: Option<&[String]>,
) -> Result<Vec<&'a RemoteResource>, DatasetError> {
    let Some(partial) = partial else {
        return Ok(remotes.iter().collect());
    };
    for key in partial {
        if !remotes.iter().any(|remote| &remote.key == key) {
            return Err(DatasetError::UnknownRemote {
                key: key.clone(),
                valid: remotes.iter().map(|remote| remote.key.clone()).collect(),
            });
        }
    }
    Ok(remotes
        .iter()
        .filter(|remote| partial.contains(&remote.key))
        .collect())
}

/// Index file keys that only unselected remotes provide. Validation should not
/// report those files missing after a partial download.
pub fn not_requested_keys(
    remotes: &[RemoteResource],
    partial: Option<&[String]>,
) -> Result<BTreeSet<String>, DatasetError> {
    let selected = select_remotes(remotes, partial)?;
    let requested: BTreeSet<&str> = selected
        .iter()
        .flat_map(|remote| remote.file_keys.iter().map(String::as_str))
        .collect();
    Ok(remotes
        .iter()
        .flat_map(|remote| remote.file_keys.iter())
        .filter(|key| !requested.contains(key.as_str()))
        .cloned()
        .collect())
}

pub trait RemoteClient: Send + Sync {
    fn download(&self, url: &str, destination: &Path) -> Result<(), DatasetError>;
}

#[derive(Clone)]
pub struct RemoteHttpClient {
    client: Client,
}

impl RemoteHttpClient {
    pub fn new() -> Result<Self, DatasetError> {
        Ok(Self {
            client: http_client(Duration::from_secs(600))?,
        })
    }
}

impl RemoteClient for RemoteHttpClient {
    fn download(&self, url: &str, destination: &Path) -> Result<(), DatasetError> {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        let mut response = loop {
            match self.client.get(url).send() {
                Ok(resp) => {
                    if attempt < MAX_RETRIES && is_retryable_status(resp.status().as_u16()) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    break resp;
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(DatasetError::RemoteHttp(err.to_string()));
                }
            }
        };
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "download failed".to_string());
            return Err(DatasetError::RemoteStatus { status, message });
        }
        let mut file =
            File::create(destination).map_err(|err| DatasetError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| DatasetError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub force_overwrite: bool,
    pub cleanup: bool,
    pub cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub items: Vec<DownloadItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadItem {
    pub key: String,
    pub action: String,
    pub path: String,
    pub extracted_files: Option<usize>,
    pub finished_at: String,
}

pub fn download(
    client: &dyn RemoteClient,
    root: &Utf8Path,
    remotes: &[RemoteResource],
    partial: Option<&[String]>,
    options: &DownloadOptions,
) -> Result<DownloadResult, DatasetError> {
    let selected = select_remotes(remotes, partial)?;
    for remote in &selected {
        remote.check_paths()?;
    }
    let mut items = Vec::with_capacity(selected.len());
    for remote in selected {
        if let Some(cancel) = &options.cancel {
            cancel.check()?;
        }
        items.push(download_one(client, root, remote, options)?);
    }
    Ok(DownloadResult { items })
}

fn download_one(
    client: &dyn RemoteClient,
    root: &Utf8Path,
    remote: &RemoteResource,
    options: &DownloadOptions,
) -> Result<DownloadItem, DatasetError> {
    let dest_dir = match &remote.destination {
        Some(dir) => root.join(dir),
        None => root.to_path_buf(),
    };
    fs::create_dir_all(dest_dir.as_std_path())
        .map_err(|err| DatasetError::Filesystem(format!("create {dest_dir}: {err}")))?;
    let target = dest_dir.join(&remote.filename);

    let action = if target.as_std_path().exists() && !options.force_overwrite {
        debug!(key = remote.key.as_str(), path = %target, "already present");
        "present"
    } else {
        info!(key = remote.key.as_str(), url = remote.url.as_str(), "downloading");
        fetch_verified(client, remote, &dest_dir, &target)?;
        "downloaded"
    };

    let extracted_files = match remote.archive_kind() {
        ArchiveKind::None => None,
        ArchiveKind::Zip => Some(extract_zip(target.as_std_path(), dest_dir.as_std_path())?),
        ArchiveKind::Tar => Some(extract_tar(target.as_std_path(), dest_dir.as_std_path())?),
    };
    if extracted_files.is_some() && options.cleanup {
        fs::remove_file(target.as_std_path())
            .map_err(|err| DatasetError::Filesystem(format!("remove {target}: {err}")))?;
    }

    Ok(DownloadItem {
        key: remote.key.clone(),
        action: action.to_string(),
        path: target.to_string(),
        extracted_files,
        finished_at: Utc::now().to_rfc3339(),
    })
}

fn fetch_verified(
    client: &dyn RemoteClient,
    remote: &RemoteResource,
    dest_dir: &Utf8Path,
    target: &Utf8Path,
) -> Result<(), DatasetError> {
    let temp = Builder::new()
        .prefix(".mir-ds-download")
        .tempfile_in(dest_dir.as_std_path())
        .map_err(|err| DatasetError::Filesystem(err.to_string()))?;
    client.download(&remote.url, temp.path())?;

    let temp_path = Utf8PathBuf::from_path_buf(temp.path().to_path_buf())
        .map_err(|_| DatasetError::Filesystem("invalid temp path".to_string()))?;
    let actual = md5_file(&temp_path)?;
    if !remote.checksum.matches(&actual) {
        return Err(DatasetError::RemoteIntegrity {
            key: remote.key.clone(),
            expected: remote.checksum.to_string(),
            actual,
        });
    }
    temp.persist(target.as_std_path())
        .map_err(|err| DatasetError::Filesystem(err.to_string()))?;
    Ok(())
}
