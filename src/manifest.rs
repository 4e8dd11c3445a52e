use std::collections::HashMap;
use std::fs;

use camino::Utf8Path;
use serde_json::{Map, Value};

use crate::domain::Checksum;
use crate::error::DatasetError;
use crate::fs_util::is_contained;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub checksum: Checksum,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMap {
    entries: Vec<(String, Option<FileEntry>)>,
}

impl FileMap {
    /// `None` if the key is not declared, `Some(None)` if it is declared `null`.
    pub fn get(&self, key: &str) -> Option<Option<&FileEntry>> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, entry)| entry.as_ref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&FileEntry>)> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.as_str(), entry.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultitrackEntry {
    pub tracks: Vec<String>,
    pub files: FileMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section<T> {
    entries: Vec<(String, T)>,
    positions: HashMap<String, usize>,
}

impl<T> Default for Section<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }
}

impl<T> Section<T> {
    fn push(&mut self, id: String, value: T) {
        self.positions.insert(id.clone(), self.entries.len());
        self.entries.push((id, value));
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.positions.get(id).map(|&idx| &self.entries[idx].1)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(id, value)| (id.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestShape {
    Flat,
    Multitrack,
    Record,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Track,
    Multitrack,
    Record,
    Metadata,
}

impl SectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::Track => "track",
            SectionKind::Multitrack => "multitrack",
            SectionKind::Record => "record",
            SectionKind::Metadata => "metadata",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ManifestFile<'a> {
    pub section: SectionKind,
    pub owner: &'a str,
    pub key: &'a str,
    pub entry: Option<&'a FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    version: String,
    shape: ManifestShape,
    tracks: Section<FileMap>,
    multitracks: Section<MultitrackEntry>,
    records: Section<FileMap>,
    metadata: FileMap,
}

impl Manifest {
    pub fn from_path(path: &Utf8Path) -> Result<Self, DatasetError> {
        let content = fs::read(path.as_std_path())
            .map_err(|err| DatasetError::Filesystem(format!("read index {path}: {err}")))?;
        Self::from_slice(&content)
    }

    pub fn from_slice(content: &[u8]) -> Result<Self, DatasetError> {
        let value: Value = serde_json::from_slice(content)
            .map_err(|err| DatasetError::ManifestFormat(err.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_json_str(content: &str) -> Result<Self, DatasetError> {
        Self::from_slice(content.as_bytes())
    }

    pub fn from_value(value: &Value) -> Result<Self, DatasetError> {
        let root = value
            .as_object()
            .ok_or_else(|| format_error("index must be a JSON object"))?;

        let version = match root.get("version") {
            Some(Value::String(version)) => version.clone(),
            Some(Value::Number(number)) => number.to_string(),
            Some(_) => return Err(format_error("`version` must be a string")),
            None => return Err(format_error("missing required key `version`")),
        };

        let has_tracks = root.contains_key("tracks");
        let has_multitracks = root.contains_key("multitracks");
        let has_records = root.contains_key("records");
        if !has_tracks && !has_multitracks && !has_records {
            return Err(format_error(
                "index needs at least one of `tracks`, `multitracks` or `records`",
            ));
        }

        let mut tracks = Section::default();
        if let Some(value) = root.get("tracks") {
            for (id, files) in section_object(value, "tracks")? {
                tracks.push(id.clone(), parse_file_map(files, &format!("tracks.{id}"))?);
            }
        }

        let mut multitracks = Section::default();
        if let Some(value) = root.get("multitracks") {
            for (id, entry) in section_object(value, "multitracks")? {
                multitracks.push(id.clone(), parse_multitrack(entry, id)?);
            }
        }

        let mut records = Section::default();
        if let Some(value) = root.get("records") {
            for (id, files) in section_object(value, "records")? {
                records.push(id.clone(), parse_file_map(files, &format!("records.{id}"))?);
            }
        }

        let metadata = match root.get("metadata") {
            Some(value) => parse_file_map(value, "metadata")?,
            None => FileMap::default(),
        };

        let shape = if has_multitracks {
            ManifestShape::Multitrack
        } else if has_records && !has_tracks {
            ManifestShape::Record
        } else {
            ManifestShape::Flat
        };

        Ok(Self {
            version,
            shape,
            tracks,
            multitracks,
            records,
            metadata,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn shape(&self) -> ManifestShape {
        self.shape
    }

    pub fn tracks(&self) -> &Section<FileMap> {
        &self.tracks
    }

    pub fn track(&self, id: &str) -> Option<&FileMap> {
        self.tracks.get(id)
    }

    pub fn multitracks(&self) -> &Section<MultitrackEntry> {
        &self.multitracks
    }

    pub fn multitrack(&self, id: &str) -> Option<&MultitrackEntry> {
        self.multitracks.get(id)
    }

    pub fn records(&self) -> &Section<FileMap> {
        &self.records
    }

    pub fn record(&self, id: &str) -> Option<&FileMap> {
        self.records.get(id)
    }

    pub fn metadata_files(&self) -> &FileMap {
        &self.metadata
    }

    pub fn files(&self) -> Vec<ManifestFile<'_>> {
        let mut files = Vec::new();
        for (id, map) in self.tracks.iter() {
            push_files(&mut files, SectionKind::Track, id, map);
        }
        for (id, entry) in self.multitracks.iter() {
            push_files(&mut files, SectionKind::Multitrack, id, &entry.files);
        }
        for (id, map) in self.records.iter() {
            push_files(&mut files, SectionKind::Record, id, map);
        }
        for (key, entry) in self.metadata.iter() {
            files.push(ManifestFile {
                section: SectionKind::Metadata,
                owner: key,
                key,
                entry,
            });
        }
        files
    }
}

fn push_files<'a>(
    files: &mut Vec<ManifestFile<'a>>,
    section: SectionKind,
    owner: &'a str,
    map: &'a FileMap,
) {
    for (key, entry) in map.iter() {
        files.push(ManifestFile {
            section,
            owner,
            key,
            entry,
        });
    }
}

fn format_error(message: impl Into<String>) -> DatasetError {
    DatasetError::ManifestFormat(message.into())
}

fn section_object<'a>(
    value: &'a Value,
    name: &str,
) -> Result<&'a Map<String, Value>, DatasetError> {
    value
        .as_object()
        .ok_or_else(|| format_error(format!("`{name}` must be an object")))
}

fn parse_file_map(value: &Value, context: &str) -> Result<FileMap, DatasetError> {
    let object = section_object(value, context)?;
    let mut entries = Vec::with_capacity(object.len());
    for (key, entry) in object {
        entries.push((key.clone(), parse_file_entry(entry, &format!("{context}.{key}"))?));
    }
    Ok(FileMap { entries })
}

fn parse_multitrack(value: &Value, id: &str) -> Result<MultitrackEntry, DatasetError> {
    let context = format!("multitracks.{id}");
    let object = section_object(value, &context)?;
    let members = object
        .get("tracks")
        .and_then(Value::as_array)
        .ok_or_else(|| format_error(format!("`{context}.tracks` must be a list of track ids")))?;
    let tracks = members
        .iter()
        .map(|member| {
            member.as_str().map(str::to_string).ok_or_else(|| {
                format_error(format!("`{context}.tracks` must contain only strings"))
            })
        })
        .collect::<Result<Vec<_>, DatasetError>>()?;

    let mut entries = Vec::new();
    for (key, entry) in object.iter().filter(|(key, _)| key.as_str() != "tracks") {
        entries.push((key.clone(), parse_file_entry(entry, &format!("{context}.{key}"))?));
    }

    Ok(MultitrackEntry {
        tracks,
        files: FileMap { entries },
    })
}

fn parse_file_entry(value: &Value, context: &str) -> Result<Option<FileEntry>, DatasetError> {
    let pair = match value {
        Value::Null => return Ok(None),
        Value::Array(pair) if pair.len() == 2 => pair,
        _ => {
            return Err(format_error(format!(
                "`{context}` must be null or a [path, checksum] pair"
            )));
        }
    };

    let path = match &pair[0] {
        Value::String(path) if !path.is_empty() => path.clone(),
        _ => {
            return Err(format_error(format!(
                "`{context}` path must be a non-empty string"
            )));
        }
    };
    if !is_contained(Utf8Path::new(&path)) {
        return Err(format_error(format!(
            "`{context}` path `{path}` must stay inside the dataset root"
        )));
    }
    let checksum = pair[1]
        .as_str()
        .ok_or_else(|| format_error(format!("`{context}` checksum must be a string")))?
        .parse::<Checksum>()
        .map_err(|_| format_error(format!("`{context}` checksum is not a hex digest")))?;

    Ok(Some(FileEntry { path, checksum }))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const SAMPLE: &str = r#"{
        "version": "1.0",
        "tracks": {
            "t2": {"audio": ["audio/t2.wav", "00ff"], "ann": null},
            "t1": {"audio": ["audio/t1.wav", "abc123"], "ann": ["ann/t1.csv", "ABCDEF"]}
        },
        "metadata": {"info": ["meta.csv", "1234"]},
        "future_key": {"anything": true}
    }"#;

    #[test]
    fn parse_keeps_document_order() {
        let manifest = Manifest::from_json_str(SAMPLE).unwrap();
        assert_eq!(manifest.version(), "1.0");
        assert_eq!(manifest.shape(), ManifestShape::Flat);
        let ids: Vec<_> = manifest.tracks().ids().collect();
        assert_eq!(ids, vec!["t2", "t1"]);
        let t1 = manifest.track("t1").unwrap();
        assert_eq!(t1.keys().collect::<Vec<_>>(), vec!["audio", "ann"]);
        assert_eq!(t1.get("ann").unwrap().unwrap().checksum.as_str(), "abcdef");
        assert_eq!(manifest.track("t2").unwrap().get("ann"), Some(None));
        assert_eq!(manifest.track("t2").unwrap().get("midi"), None);
    }

    #[test]
    fn files_cover_all_sections() {
        let manifest = Manifest::from_json_str(SAMPLE).unwrap();
        let files = manifest.files();
        assert_eq!(files.len(), 5);
        assert_eq!(files[0].owner, "t2");
        assert_eq!(files[4].section, SectionKind::Metadata);
        assert_eq!(files[4].entry.unwrap().path, "meta.csv");
    }

    #[test]
    fn parse_multitracks() {
        let manifest = Manifest::from_json_str(
            r#"{"version": "2", "tracks": {"a": {}, "b": {}},
                "multitracks": {"m": {"tracks": ["a", "b"], "mix": ["mix.wav", "aa"]}}}"#,
        )
        .unwrap();
        assert_eq!(manifest.shape(), ManifestShape::Multitrack);
        let entry = manifest.multitrack("m").unwrap();
        assert_eq!(entry.tracks, vec!["a", "b"]);
        assert_eq!(entry.files.keys().collect::<Vec<_>>(), vec!["mix"]);
    }

    #[test]
    fn record_only_index() {
        let manifest =
            Manifest::from_json_str(r#"{"version": "1", "records": {"r": {"x": null}}}"#).unwrap();
        assert_eq!(manifest.shape(), ManifestShape::Record);
        assert!(manifest.tracks().is_empty());
        assert!(manifest.record("r").is_some());
    }

    #[test]
    fn missing_required_keys() {
        assert_matches!(
            Manifest::from_json_str(r#"{"tracks": {}}"#),
            Err(DatasetError::ManifestFormat(_))
        );
        assert_matches!(
            Manifest::from_json_str(r#"{"version": "1"}"#),
            Err(DatasetError::ManifestFormat(_))
        );
    }

    #[test]
    fn malformed_file_entries() {
        for entry in [
            r#"["only-path"]"#,
            r#"["", "abc"]"#,
            r#"["a.wav", "zz-not-hex"]"#,
            r#"["a.wav", 12]"#,
            r#""a.wav""#,
            r#"["/etc/passwd", "abc"]"#,
            r#"["../outside.bin", "abc"]"#,
            r#"["audio/../../outside.bin", "abc"]"#,
        ] {
            let doc = format!(r#"{{"version": "1", "tracks": {{"t": {{"audio": {entry}}}}}}}"#);
            assert_matches!(
                Manifest::from_json_str(&doc),
                Err(DatasetError::ManifestFormat(_)),
                "entry {} should be rejected",
                entry
            );
        }
    }
}
