use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{
    InfoResult, ListResult, ProgressEvent, ProgressSink, RandomTrackResult, ValidateResult,
};
use crate::download::DownloadResult;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_info(result: &InfoResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_validate(result: &ValidateResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_random_track(result: &RandomTrackResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_list(result: &ListResult) {
        for entry in &result.datasets {
            println!(
                "{} ({}) default={} test={} versions=[{}]",
                entry.name,
                entry.display_name,
                entry.default_version,
                entry.test_version,
                entry.versions.join(", ")
            );
        }
    }

    pub fn print_info(result: &InfoResult) {
        println!("{} ({})", result.display_name, result.name);
        println!("  version:        {}", result.version);
        println!("  root:           {}", result.root);
        println!("  tracks:         {}", result.tracks);
        println!("  multitracks:    {}", result.multitracks);
        println!("  records:        {}", result.records);
        println!("  metadata files: {}", result.metadata_files);
        println!("  remotes:        {}", result.remotes.join(", "));
        if let Some(license) = &result.license {
            println!("  license:        {license}");
        }
    }

    pub fn print_validate(result: &ValidateResult) {
        println!(
            "{} {} at {}: {} files checked",
            result.name, result.version, result.root, result.report.checked
        );
        for line in result.report.summary() {
            println!("  {line}");
        }
        if result.valid {
            println!("dataset is valid");
        } else {
            println!(
                "dataset is invalid: {} missing, {} with bad checksums, {} unreadable",
                result.report.missing_files.len(),
                result.report.invalid_checksums.len(),
                result.report.unreadable_files.len()
            );
        }
    }

    pub fn print_download(result: &DownloadResult) {
        for item in &result.items {
            match item.extracted_files {
                Some(count) => println!("{} {} ({count} files) {}", item.action, item.key, item.path),
                None => println!("{} {} {}", item.action, item.key, item.path),
            }
        }
    }

    pub fn print_random_track(result: &RandomTrackResult) {
        println!("{} track {}", result.name, result.id);
        for file in &result.files {
            let path = file.path.as_deref().unwrap_or("-");
            let marker = if file.present { "present" } else { "absent" };
            println!("  {:<16} {path} ({marker})", file.key);
        }
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!("{} ({:.2?})", event.message, elapsed),
            None => info!("{}", event.message),
        }
    }
}
