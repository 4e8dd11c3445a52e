use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::checksum::{md5_bytes, md5_file};
use crate::domain::{Checksum, DEFAULT_VERSION, TEST_VERSION};
use crate::error::DatasetError;
use crate::manifest::Manifest;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSource {
    /// Empty means the conventional name, see [`index_filename`].
    #[serde(default)]
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
}

impl IndexSource {
    pub fn local(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            url: None,
            checksum: None,
        }
    }

    pub fn remote(filename: impl Into<String>, url: impl Into<String>, checksum: Checksum) -> Self {
        Self {
            filename: filename.into(),
            url: Some(url.into()),
            checksum: Some(checksum),
        }
    }
}

pub fn index_filename(dataset: &str, version: &str) -> String {
    format!("{dataset}_index_{version}.json")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTable {
    default: String,
    test: String,
    versions: Vec<(String, IndexSource)>,
}

impl VersionTable {
    pub fn new(
        default: impl Into<String>,
        test: impl Into<String>,
        versions: Vec<(String, IndexSource)>,
    ) -> Result<Self, DatasetError> {
        let default = default.into();
        let test = test.into();
        for (label, source) in &versions {
            if label == DEFAULT_VERSION || label == TEST_VERSION {
                return Err(DatasetError::InvalidDefinition(format!(
                    "version label {label:?} is reserved"
                )));
            }
            if source.filename.is_empty() {
                return Err(DatasetError::InvalidDefinition(format!(
                    "version {label}: missing index filename"
                )));
            }
            if source.url.is_some() != source.checksum.is_some() {
                return Err(DatasetError::InvalidDefinition(format!(
                    "version {label}: remote indexes need both url and checksum"
                )));
            }
        }
        for (alias, target) in [(DEFAULT_VERSION, &default), (TEST_VERSION, &test)] {
            if !versions.iter().any(|(label, _)| label == target) {
                return Err(DatasetError::InvalidDefinition(format!(
                    "{alias:?} points at undeclared version {target:?}"
                )));
            }
        }
        Ok(Self {
            default,
            test,
            versions,
        })
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.versions.iter().map(|(label, _)| label.as_str())
    }

    pub fn default_label(&self) -> &str {
        &self.default
    }

    pub fn test_label(&self) -> &str {
        &self.test
    }

    pub fn resolve_label(
        &self,
        dataset: &str,
        requested: &str,
    ) -> Result<(&str, &IndexSource), DatasetError> {
        let concrete = match requested {
            DEFAULT_VERSION => self.default.as_str(),
            TEST_VERSION => self.test.as_str(),
            other => other,
        };
        self.versions
            .iter()
            .find(|(label, _)| label == concrete)
            .map(|(label, source)| (label.as_str(), source))
            .ok_or_else(|| DatasetError::UnknownVersion {
                dataset: dataset.to_string(),
                version: requested.to_string(),
                valid: [DEFAULT_VERSION, TEST_VERSION]
                    .iter()
                    .map(|label| label.to_string())
                    .chain(self.labels().map(str::to_string))
                    .collect(),
            })
    }
}

pub trait IndexClient: Send + Sync {
    fn fetch_index(&self, url: &str) -> Result<Vec<u8>, DatasetError>;
}

#[derive(Clone)]
pub struct IndexHttpClient {
    client: Client,
}

impl IndexHttpClient {
    pub fn new() -> Result<Self, DatasetError> {
        Ok(Self {
            client: http_client(Duration::from_secs(30))?,
        })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, DatasetError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
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
        }
    }
}

impl IndexClient for IndexHttpClient {
    fn fetch_index(&self, url: &str) -> Result<Vec<u8>, DatasetError> {
        let response = self.send_with_retries(|| self.client.get(url))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "index request failed".to_string());
            return Err(DatasetError::RemoteStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| DatasetError::RemoteHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<Client, DatasetError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("mir-datasets/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| DatasetError::RemoteHttp(err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|err| DatasetError::RemoteHttp(err.to_string()))
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

pub(crate) fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[derive(Clone)]
pub struct IndexResolver {
    indexes_dir: Utf8PathBuf,
    client: Arc<dyn IndexClient>,
}

impl IndexResolver {
    pub fn new(indexes_dir: Utf8PathBuf, client: Arc<dyn IndexClient>) -> Self {
        Self {
            indexes_dir,
            client,
        }
    }

    pub fn indexes_dir(&self) -> &Utf8Path {
        &self.indexes_dir
    }

    pub fn resolve(
        &self,
        dataset: &str,
        versions: &VersionTable,
        version: &str,
        root: &Utf8Path,
    ) -> Result<Manifest, DatasetError> {
        let (label, source) = versions.resolve_label(dataset, version)?;
        debug!(dataset, version, label, "resolving index");

        let (url, checksum) = match (&source.url, &source.checksum) {
            (Some(url), Some(checksum)) => (url, checksum),
            _ => {
                let path = self.indexes_dir.join(&source.filename);
                return Manifest::from_path(&path);
            }
        };

        let cache_path = Store::index_cache_path(root, &source.filename);
        if cache_path.as_std_path().is_file() {
            let actual = md5_file(&cache_path)?;
            if checksum.matches(&actual) {
                debug!(path = %cache_path, "using cached index");
                return Manifest::from_path(&cache_path);
            }
            info!(path = %cache_path, "cached index checksum mismatch; refetching");
        }

        info!(dataset, label, url = url.as_str(), "fetching remote index");
        let content = self.client.fetch_index(url)?;
        let actual = md5_bytes(&content);
        if !checksum.matches(&actual) {
            return Err(DatasetError::IndexIntegrity {
                path: cache_path,
                expected: checksum.to_string(),
                actual,
            });
        }
        Store::write_bytes_atomic(&cache_path, &content)?;
        Manifest::from_slice(&content)
    }

    pub fn clear_cache(root: &Utf8Path, source: &IndexSource) -> Result<bool, DatasetError> {
        let path = Store::index_cache_path(root, &source.filename);
        if !path.as_std_path().exists() {
            return Ok(false);
        }
        fs::remove_file(path.as_std_path())
            .map_err(|err| DatasetError::Filesystem(format!("remove {path}: {err}")))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn table() -> VersionTable {
        VersionTable::new(
            "1.0",
            "sample",
            vec![
                ("1.0".to_string(), IndexSource::local("d_index_1.0.json")),
                ("sample".to_string(), IndexSource::local("d_index_sample.json")),
            ],
        )
        .unwrap()
    }

    #[test]
    fn reserved_labels_resolve_to_concrete_versions() {
        let table = table();
        assert_eq!(table.resolve_label("d", "default").unwrap().0, "1.0");
        assert_eq!(table.resolve_label("d", "test").unwrap().0, "sample");
        assert_eq!(table.resolve_label("d", "1.0").unwrap().0, "1.0");
    }

    #[test]
    fn unknown_version_lists_labels() {
        let err = table().resolve_label("d", "9.9").unwrap_err();
        assert_matches!(err, DatasetError::UnknownVersion { ref valid, .. } if valid.contains(&"sample".to_string()));
    }

    #[test]
    fn aliases_must_point_at_declared_versions() {
        let err = VersionTable::new("2.0", "1.0", vec![("1.0".to_string(), IndexSource::local("x"))])
            .unwrap_err();
        assert_matches!(err, DatasetError::InvalidDefinition(_));
    }

    #[test]
    fn remote_sources_need_checksum() {
        let source = IndexSource {
            filename: "x.json".to_string(),
            url: Some("https://example.org/x.json".to_string()),
            checksum: None,
        };
        let err = VersionTable::new("1", "1", vec![("1".to_string(), source)]).unwrap_err();
        assert_matches!(err, DatasetError::InvalidDefinition(_));
    }

    #[test]
    fn index_filename_convention() {
        assert_eq!(index_filename("beatles", "1.2"), "beatles_index_1.2.json");
    }
}
