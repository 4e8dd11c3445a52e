use std::collections::BTreeSet;

use camino::Utf8Path;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::checksum::md5_file;
use crate::error::DatasetError;
use crate::manifest::{FileEntry, Manifest, ManifestFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampling {
    pub max_files: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Logical file keys the caller chose not to download. Their files are
    /// still checksummed when present but never reported missing.
    pub not_requested: BTreeSet<String>,
    pub sampling: Option<Sampling>,
    pub parallel: bool,
    pub cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidChecksum {
    pub path: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreadableFile {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub missing_files: Vec<String>,
    pub invalid_checksums: Vec<InvalidChecksum>,
    pub unreadable_files: Vec<UnreadableFile>,
    pub checked: usize,
    pub cancelled: bool,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.missing_files.is_empty()
            && self.invalid_checksums.is_empty()
            && self.unreadable_files.is_empty()
    }

    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for path in &self.missing_files {
            lines.push(format!("missing: {path}"));
        }
        for invalid in &self.invalid_checksums {
            lines.push(format!(
                "invalid checksum: {} (expected {}, got {})",
                invalid.path, invalid.expected, invalid.actual
            ));
        }
        for unreadable in &self.unreadable_files {
            lines.push(format!("unreadable: {} ({})", unreadable.path, unreadable.message));
        }
        if self.cancelled {
            lines.push(format!("cancelled after {} files", self.checked));
        }
        lines
    }
}

enum Outcome {
    Valid,
    Missing,
    NotRequested,
    Invalid(String),
    Unreadable(String),
    Cancelled,
}

/// Validates every non-null file entry of `manifest` against `root`. Only an
/// absent root is an error; every per-file problem lands in the report.
pub fn validate(
    manifest: &Manifest,
    root: &Utf8Path,
    options: &ValidateOptions,
) -> Result<ValidationReport, DatasetError> {
    if !root.as_std_path().is_dir() {
        return Err(DatasetError::RootNotFound(root.to_path_buf()));
    }

    let files = manifest.files();
    let mut candidates: Vec<(&ManifestFile<'_>, &FileEntry)> = files
        .iter()
        .filter_map(|file| file.entry.map(|entry| (file, entry)))
        .collect();
    if let Some(sampling) = options.sampling {
        candidates = sample(candidates, sampling);
    }
    debug!(root = %root, files = candidates.len(), parallel = options.parallel, "validating");

    let check = |(file, entry): &(&ManifestFile<'_>, &FileEntry)| {
        check_file(root, file, entry, options)
    };
    let outcomes: Vec<Outcome> = if options.parallel {
        candidates.par_iter().map(check).collect()
    } else {
        let mut outcomes = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let outcome = check(candidate);
            let stop = matches!(outcome, Outcome::Cancelled);
            outcomes.push(outcome);
            if stop {
                break;
            }
        }
        outcomes
    };

    let mut report = ValidationReport::default();
    for ((_, entry), outcome) in candidates.iter().zip(outcomes) {
        match outcome {
            Outcome::Valid | Outcome::NotRequested => report.checked += 1,
            Outcome::Missing => {
                report.checked += 1;
                report.missing_files.push(entry.path.clone());
            }
            Outcome::Invalid(actual) => {
                report.checked += 1;
                report.invalid_checksums.push(InvalidChecksum {
                    path: entry.path.clone(),
                    expected: entry.checksum.to_string(),
                    actual,
                });
            }
            Outcome::Unreadable(message) => {
                report.checked += 1;
                report.unreadable_files.push(UnreadableFile {
                    path: entry.path.clone(),
                    message,
                });
            }
            Outcome::Cancelled => report.cancelled = true,
        }
    }

    if report.is_valid() {
        info!(checked = report.checked, "dataset is valid");
    } else {
        warn!(
            missing = report.missing_files.len(),
            invalid = report.invalid_checksums.len(),
            unreadable = report.unreadable_files.len(),
            "dataset failed validation"
        );
    }
    Ok(report)
}

fn check_file(
    root: &Utf8Path,
    file: &ManifestFile<'_>,
    entry: &FileEntry,
    options: &ValidateOptions,
) -> Outcome {
    if options.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
        return Outcome::Cancelled;
    }
    let path = root.join(&entry.path);
    if !path.as_std_path().is_file() {
        if options.not_requested.contains(file.key) {
            return Outcome::NotRequested;
        }
        debug!(section = file.section.as_str(), owner = file.owner, path = %path, "missing file");
        return Outcome::Missing;
    }
    match md5_file(&path) {
        Ok(actual) if entry.checksum.matches(&actual) => Outcome::Valid,
        Ok(actual) => Outcome::Invalid(actual),
        Err(err) => {
            warn!(path = %path, error = %err, "file could not be read");
            Outcome::Unreadable(err.to_string())
        }
    }
}

fn sample<T>(candidates: Vec<T>, sampling: Sampling) -> Vec<T> {
    if candidates.len() <= sampling.max_files {
        return candidates;
    }
    let mut rng = fastrand::Rng::with_seed(sampling.seed);
    let mut indices: Vec<usize> = (0..candidates.len()).collect();
    rng.shuffle(&mut indices);
    let chosen: BTreeSet<usize> = indices.into_iter().take(sampling.max_files).collect();
    candidates
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| chosen.contains(idx))
        .map(|(_, candidate)| candidate)
        .collect()
}
