use std::fs;
use std::io::ErrorKind;

use camino::Utf8Path;
use csv::{ReaderBuilder, Trim};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::Loaders;
use crate::error::DatasetError;

#[derive(Debug, Clone, PartialEq)]
pub enum Annotation {
    Bytes(Vec<u8>),
    Text(String),
    Json(Value),
    Table(Vec<Vec<String>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Bytes,
    Text,
    Json,
    Csv,
    Tsv,
}

impl FieldKind {
    pub fn load(self, path: &Utf8Path) -> Result<Option<Annotation>, DatasetError> {
        Ok(match self {
            FieldKind::Bytes => load_bytes(path)?.map(Annotation::Bytes),
            FieldKind::Text => load_text(path)?.map(Annotation::Text),
            FieldKind::Json => load_json(path)?.map(Annotation::Json),
            FieldKind::Csv => load_delimited(path, b',')?.map(Annotation::Table),
            FieldKind::Tsv => load_delimited(path, b'\t')?.map(Annotation::Table),
        })
    }
}

pub fn annotation_loaders<'a>(
    fields: impl IntoIterator<Item = (&'a str, FieldKind)>,
) -> Loaders<Annotation> {
    let mut loaders = Loaders::new();
    for (key, kind) in fields {
        loaders.register(key, move |path: &Utf8Path| kind.load(path));
    }
    loaders
}

pub fn load_bytes(path: &Utf8Path) -> Result<Option<Vec<u8>>, DatasetError> {
    match fs::read(path.as_std_path()) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(DatasetError::Filesystem(format!("read {path}: {err}"))),
    }
}

pub fn load_text(path: &Utf8Path) -> Result<Option<String>, DatasetError> {
    let Some(content) = load_bytes(path)? else {
        return Ok(None);
    };
    String::from_utf8(content)
        .map(Some)
        .map_err(|err| parse_error(path, err))
}

pub fn load_json(path: &Utf8Path) -> Result<Option<Value>, DatasetError> {
    let Some(content) = load_bytes(path)? else {
        return Ok(None);
    };
    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|err| parse_error(path, err))
}

pub fn load_delimited(
    path: &Utf8Path,
    delimiter: u8,
) -> Result<Option<Vec<Vec<String>>>, DatasetError> {
    let Some(content) = load_bytes(path)? else {
        return Ok(None);
    };
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .trim(Trim::All)
        .from_reader(content.as_slice());
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| parse_error(path, err))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(Some(rows))
}

fn parse_error(path: &Utf8Path, err: impl std::fmt::Display) -> DatasetError {
    DatasetError::AnnotationParse {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
