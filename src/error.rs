use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DatasetError {
    #[error("malformed dataset index: {0}")]
    ManifestFormat(String),

    #[error("unknown version {version:?} for dataset {dataset}; valid versions: {}", valid.join(", "))]
    UnknownVersion {
        dataset: String,
        version: String,
        valid: Vec<String>,
    },

    #[error("unknown {kind} id {id:?}; valid ids: {}", preview(valid))]
    UnknownId {
        kind: &'static str,
        id: String,
        valid: Vec<String>,
    },

    #[error("unknown field {key:?} on {id}; declared fields: {}", valid.join(", "))]
    UnknownField {
        id: String,
        key: String,
        valid: Vec<String>,
    },

    #[error("dataset has no {0}s")]
    EmptySection(&'static str),

    #[error("no loader registered for field {key:?}")]
    NoLoader { key: String },

    #[error("index {path} failed checksum verification (expected {expected}, got {actual})")]
    #[diagnostic(help("remove the cached index file and retry"))]
    IndexIntegrity {
        path: Utf8PathBuf,
        expected: String,
        actual: String,
    },

    #[error("remote {key} failed checksum verification (expected {expected}, got {actual})")]
    RemoteIntegrity {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("unknown remote {key:?}; valid remotes: {}", valid.join(", "))]
    UnknownRemote { key: String, valid: Vec<String> },

    #[error("unknown dataset {name:?}; available datasets: {}", valid.join(", "))]
    UnknownDataset { name: String, valid: Vec<String> },

    #[error("invalid dataset definition: {0}")]
    InvalidDefinition(String),

    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("failed to parse annotation {path}: {message}")]
    AnnotationParse { path: Utf8PathBuf, message: String },

    #[error("failed to decode audio {path}: {message}")]
    AudioDecode { path: Utf8PathBuf, message: String },

    #[error("dataset root does not exist: {0}")]
    RootNotFound(Utf8PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("index request failed: {0}")]
    RemoteHttp(String),

    #[error("remote returned status {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("operation cancelled")]
    Cancelled,
}

fn preview(ids: &[String]) -> String {
    const LIMIT: usize = 10;
    if ids.len() <= LIMIT {
        return ids.join(", ");
    }
    format!("{}, ... ({} total)", ids[..LIMIT].join(", "), ids.len())
}
