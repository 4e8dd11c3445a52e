use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::cancel::CancellationToken;
use crate::dataset::DatasetAccess;
use crate::download::{DownloadOptions, DownloadResult, not_requested_keys};
use crate::error::DatasetError;
use crate::loaders::Annotation;
use crate::registry::{DatasetRegistry, InitOptions};
use crate::validate::{Sampling, ValidateOptions, ValidationReport};

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub datasets: Vec<ListEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub name: String,
    pub display_name: String,
    pub default_version: String,
    pub test_version: String,
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResult {
    pub name: String,
    pub display_name: String,
    pub version: String,
    pub root: String,
    pub tracks: usize,
    pub multitracks: usize,
    pub records: usize,
    pub metadata_files: usize,
    pub remotes: Vec<String>,
    pub license: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateResult {
    pub name: String,
    pub version: String,
    pub root: String,
    pub valid: bool,
    pub report: ValidationReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct RandomTrackResult {
    pub name: String,
    pub id: String,
    pub files: Vec<TrackFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackFile {
    pub key: String,
    pub path: Option<String>,
    pub present: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ValidateRequest {
    pub version: Option<String>,
    pub root: Option<Utf8PathBuf>,
    pub sample: Option<usize>,
    pub seed: u64,
    pub parallel: bool,
    pub skip_keys: Vec<String>,
    pub partial: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App {
    registry: DatasetRegistry<Annotation>,
    cancel: CancellationToken,
}

impl App {
    pub fn new(registry: DatasetRegistry<Annotation>) -> Self {
        Self {
            registry,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn list(&self, sink: &dyn ProgressSink) -> Result<ListResult, DatasetError> {
        sink.event(ProgressEvent {
            message: "phase=Resolve; listing datasets".to_string(),
            elapsed: None,
        });
        let mut datasets = Vec::new();
        for name in self.registry.list_datasets() {
            let dataset = self.registry.initialize(&name, &InitOptions::default())?;
            let versions = dataset.versions();
            datasets.push(ListEntry {
                display_name: dataset.display_name().to_string(),
                default_version: versions.default_label().to_string(),
                test_version: versions.test_label().to_string(),
                versions: versions.labels().map(str::to_string).collect(),
                name,
            });
        }
        Ok(ListResult { datasets })
    }

    pub fn info(
        &self,
        name: &str,
        options: &InitOptions,
        sink: &dyn ProgressSink,
    ) -> Result<InfoResult, DatasetError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; loading index for {name}"),
            elapsed: None,
        });
        let dataset = self.registry.initialize(name, options)?;
        let manifest = dataset.manifest()?;
        Ok(InfoResult {
            name: name.to_string(),
            display_name: dataset.display_name().to_string(),
            version: manifest.version().to_string(),
            root: dataset.root().to_string(),
            tracks: manifest.tracks().len(),
            multitracks: manifest.multitracks().len(),
            records: manifest.records().len(),
            metadata_files: manifest.metadata_files().len(),
            remotes: dataset.remotes().iter().map(|remote| remote.key.clone()).collect(),
            license: dataset.license().map(str::to_string),
        })
    }

    pub fn validate(
        &self,
        name: &str,
        request: &ValidateRequest,
        sink: &dyn ProgressSink,
    ) -> Result<ValidateResult, DatasetError> {
        let dataset = self.registry.initialize(name, &init_options(request))?;
        let mut options = ValidateOptions {
            not_requested: request.skip_keys.iter().cloned().collect(),
            sampling: request.sample.map(|max_files| Sampling {
                max_files,
                seed: request.seed,
            }),
            parallel: request.parallel,
            cancel: Some(self.cancel.clone()),
        };
        if let Some(partial) = &request.partial {
            let skipped = not_requested_keys(dataset.remotes(), Some(partial.as_slice()))?;
            options.not_requested.extend(skipped);
        }

        sink.event(ProgressEvent {
            message: format!("phase=Validate; checking {}", dataset.root()),
            elapsed: None,
        });
        let started = Instant::now();
        let report = run_validation(&dataset, &options)?;
        sink.event(ProgressEvent {
            message: format!("phase=Validate; checked {} files", report.checked),
            elapsed: Some(started.elapsed()),
        });

        Ok(ValidateResult {
            name: name.to_string(),
            version: dataset.resolved_version()?.to_string(),
            root: dataset.root().to_string(),
            valid: report.is_valid(),
            report,
        })
    }

    pub fn download(
        &self,
        name: &str,
        init: &InitOptions,
        partial: Option<&[String]>,
        force_overwrite: bool,
        cleanup: bool,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, DatasetError> {
        let dataset = self.registry.initialize(name, init)?;
        let options = DownloadOptions {
            force_overwrite,
            cleanup,
            cancel: Some(self.cancel.clone()),
        };
        sink.event(ProgressEvent {
            message: format!("phase=Download; {} into {}", name, dataset.root()),
            elapsed: None,
        });
        let started = Instant::now();
        let result = dataset.download(partial, &options)?;
        sink.event(ProgressEvent {
            message: format!("phase=Download; {} resources", result.items.len()),
            elapsed: Some(started.elapsed()),
        });
        Ok(result)
    }

    pub fn random_track(
        &self,
        name: &str,
        init: &InitOptions,
        seed: Option<u64>,
        sink: &dyn ProgressSink,
    ) -> Result<RandomTrackResult, DatasetError> {
        let dataset = self.registry.initialize(name, init)?;
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; sampling a track from {name}"),
            elapsed: None,
        });
        let track = dataset.choose_random_track(seed)?;
        let mut files = Vec::new();
        for key in track.keys() {
            let path = track.path(key)?;
            files.push(TrackFile {
                key: key.to_string(),
                present: path.is_some_and(|path| path.as_std_path().is_file()),
                path: path.map(|path| path.to_string()),
            });
        }
        Ok(RandomTrackResult {
            name: name.to_string(),
            id: track.id().to_string(),
            files,
        })
    }
}

fn init_options(request: &ValidateRequest) -> InitOptions {
    InitOptions {
        version: request.version.clone(),
        root: request.root.clone(),
    }
}

fn run_validation<D: DatasetAccess>(
    dataset: &D,
    options: &ValidateOptions,
) -> Result<ValidationReport, DatasetError> {
    tracing::info!(dataset = dataset.name(), "validating dataset");
    dataset.validate(options)
}
