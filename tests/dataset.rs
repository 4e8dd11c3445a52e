use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use mir_datasets::checksum::md5_bytes;
use mir_datasets::dataset::{Dataset, DatasetAccess};
use mir_datasets::download::RemoteResource;
use mir_datasets::entity::Loaders;
use mir_datasets::error::DatasetError;
use mir_datasets::index::{IndexClient, IndexResolver, IndexSource, VersionTable};
use mir_datasets::manifest::ManifestShape;
use mir_datasets::validate::ValidateOptions;

struct Offline;

impl IndexClient for Offline {
    fn fetch_index(&self, _url: &str) -> Result<Vec<u8>, DatasetError> {
        Err(DatasetError::RemoteHttp("offline".to_string()))
    }
}

struct FixedIndex(Vec<u8>);

impl IndexClient for FixedIndex {
    fn fetch_index(&self, _url: &str) -> Result<Vec<u8>, DatasetError> {
        Ok(self.0.clone())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    indexes: Utf8PathBuf,
    root: Utf8PathBuf,
}

impl Fixture {
    fn new(index: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let indexes = base.join("indexes");
        let root = base.join("Demo");
        fs::create_dir_all(&indexes).unwrap();
        fs::create_dir_all(&root).unwrap();
        fs::write(indexes.join("demo_index_1.0.json"), index).unwrap();
        Self {
            _dir: dir,
            indexes,
            root,
        }
    }

    fn write(&self, relative: &str, content: &[u8]) {
        let path = self.root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn dataset<V>(&self, loaders: Loaders<V>) -> Dataset<V> {
        let versions = VersionTable::new(
            "1.0".to_string(),
            "1.0".to_string(),
            vec![("1.0".to_string(), IndexSource::local("demo_index_1.0.json"))],
        )
        .unwrap();
        let resolver = IndexResolver::new(self.indexes.clone(), Arc::new(Offline));
        Dataset::new("demo", versions, resolver, self.root.clone())
            .with_display_name("Demo")
            .with_loaders(loaders)
    }
}

fn flat_index() -> String {
    format!(
        r#"{{
            "version": "1.0",
            "tracks": {{
                "t2": {{"audio": ["a/t2.wav", "{a2}"], "beats": null}},
                "t1": {{"audio": ["a/t1.wav", "{a1}"], "beats": ["b/t1.txt", "{b1}"]}},
                "t3": {{"audio": ["a/t3.wav", "{a3}"], "beats": ["b/t3.txt", "{b3}"]}}
            }}
        }}"#,
        a1 = md5_bytes(b"one"),
        a2 = md5_bytes(b"two"),
        a3 = md5_bytes(b"three"),
        b1 = md5_bytes(b"0.5\n1.0\n"),
        b3 = md5_bytes(b"0.25\n"),
    )
}

fn beat_loaders(calls: Arc<AtomicUsize>) -> Loaders<Vec<f64>> {
    Loaders::new().with("beats", move |path: &Utf8Path| {
        calls.fetch_add(1, Ordering::SeqCst);
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(
                text.lines()
                    .map(|line| line.parse::<f64>().unwrap_or_default())
                    .collect(),
            )),
            Err(_) => Ok(None),
        }
    })
}

#[test]
fn track_ids_follow_index_order() {
    let fixture = Fixture::new(&flat_index());
    let dataset = fixture.dataset::<()>(Loaders::new());
    assert_eq!(dataset.track_ids().unwrap(), vec!["t2", "t1", "t3"]);
    assert_eq!(dataset.manifest().unwrap().shape(), ManifestShape::Flat);
    assert_eq!(dataset.resolved_version().unwrap(), "1.0");
    assert_eq!(dataset.version(), "default");
}

#[test]
fn track_paths_are_joined_to_root() {
    let fixture = Fixture::new(&flat_index());
    let dataset = fixture.dataset::<()>(Loaders::new());
    let track = dataset.track("t1").unwrap();
    assert_eq!(track.id(), "t1");
    assert_eq!(
        track.path("audio").unwrap(),
        Some(fixture.root.join("a/t1.wav").as_path())
    );
    assert_eq!(dataset.track("t2").unwrap().path("beats").unwrap(), None);
}

#[test]
fn unknown_track_lists_valid_ids() {
    let fixture = Fixture::new(&flat_index());
    let dataset = fixture.dataset::<()>(Loaders::new());
    assert_matches!(
        dataset.track("t9"),
        Err(DatasetError::UnknownId { id, valid, .. }) if id == "t9" && valid.len() == 3
    );
}

#[test]
fn values_load_lazily_and_once() {
    let fixture = Fixture::new(&flat_index());
    fixture.write("b/t1.txt", b"0.5\n1.0\n");
    let calls = Arc::new(AtomicUsize::new(0));
    let dataset = fixture.dataset(beat_loaders(calls.clone()));

    let track = dataset.track("t1").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!track.is_loaded("beats"));

    assert_eq!(track.value("beats").unwrap(), Some(&vec![0.5, 1.0]));
    assert_eq!(track.value("beats").unwrap(), Some(&vec![0.5, 1.0]));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(track.is_loaded("beats"));
}

#[test]
fn null_and_absent_files_load_as_none() {
    let fixture = Fixture::new(&flat_index());
    let calls = Arc::new(AtomicUsize::new(0));
    let dataset = fixture.dataset(beat_loaders(calls.clone()));

    assert_eq!(dataset.track("t2").unwrap().value("beats").unwrap(), None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert_eq!(dataset.track("t3").unwrap().value("beats").unwrap(), None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn field_without_loader() {
    let fixture = Fixture::new(&flat_index());
    let dataset = fixture.dataset(beat_loaders(Arc::new(AtomicUsize::new(0))));
    let track = dataset.track("t1").unwrap();
    assert_matches!(track.value("audio"), Err(DatasetError::NoLoader { key }) if key == "audio");
    assert_matches!(
        track.value("chords"),
        Err(DatasetError::UnknownField { key, .. }) if key == "chords"
    );
}

#[test]
fn load_tracks_covers_every_id() {
    let fixture = Fixture::new(&flat_index());
    let dataset = fixture.dataset::<()>(Loaders::new());
    let tracks = dataset.load_tracks().unwrap();
    assert_eq!(tracks.len(), 3);
    assert!(tracks.keys().all(|id| ["t1", "t2", "t3"].contains(&id.as_str())));
}

#[test]
fn random_track_is_seeded() {
    let fixture = Fixture::new(&flat_index());
    let dataset = fixture.dataset::<()>(Loaders::new());
    let first = dataset.choose_random_track(Some(3)).unwrap();
    let second = dataset.choose_random_track(Some(3)).unwrap();
    assert_eq!(first.id(), second.id());
    assert!(dataset.track_ids().unwrap().contains(&first.id().to_string()));
}

#[test]
fn validate_through_the_handle() {
    let fixture = Fixture::new(&flat_index());
    fixture.write("a/t1.wav", b"one");
    fixture.write("a/t2.wav", b"two");
    fixture.write("a/t3.wav", b"three");
    fixture.write("b/t1.txt", b"0.5\n1.0\n");
    fixture.write("b/t3.txt", b"0.25\n");
    let dataset = fixture.dataset::<()>(Loaders::new());

    let report = dataset.validate(&ValidateOptions::default()).unwrap();
    assert!(report.is_valid());
    assert_eq!(report.checked, 5);

    let report = DatasetAccess::validate(&dataset, &ValidateOptions::default()).unwrap();
    assert!(report.is_valid());
}

#[test]
fn remote_index_does_not_hide_a_missing_root() {
    let dir = tempfile::tempdir().unwrap();
    let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let root = base.join("Never_Downloaded");
    let index = br#"{"version": "1.0", "tracks": {"t1": {"audio": ["a.wav", "00"]}}}"#;
    let versions = VersionTable::new(
        "1.0".to_string(),
        "1.0".to_string(),
        vec![(
            "1.0".to_string(),
            IndexSource::remote(
                "demo_index_1.0.json",
                "https://example.org/demo_index_1.0.json",
                md5_bytes(index).parse().unwrap(),
            ),
        )],
    )
    .unwrap();
    let resolver = IndexResolver::new(base.join("indexes"), Arc::new(FixedIndex(index.to_vec())));
    let dataset = Dataset::<()>::new("demo", versions, resolver, root.clone());

    assert_matches!(
        dataset.validate(&ValidateOptions::default()),
        Err(DatasetError::RootNotFound(path)) if path == root
    );
    assert!(!root.exists());
}

#[test]
fn partial_validation_skips_unrequested_remotes() {
    let fixture = Fixture::new(&flat_index());
    fixture.write("b/t1.txt", b"0.5\n1.0\n");
    fixture.write("b/t3.txt", b"0.25\n");
    let remote = |key: &str, file_keys: &[&str]| RemoteResource {
        key: key.to_string(),
        filename: format!("{key}.zip"),
        url: format!("https://example.org/{key}.zip"),
        checksum: md5_bytes(key.as_bytes()).parse().unwrap(),
        archive: None,
        destination: None,
        file_keys: file_keys.iter().map(|key| key.to_string()).collect(),
    };
    let dataset = fixture
        .dataset::<()>(Loaders::new())
        .with_remotes(vec![remote("audio", &["audio"]), remote("beats", &["beats"])]);

    let full = dataset.validate(&ValidateOptions::default()).unwrap();
    assert_eq!(full.missing_files.len(), 3);

    let partial = dataset
        .validate_partial(&["beats".to_string()], &ValidateOptions::default())
        .unwrap();
    assert!(partial.is_valid());

    assert_matches!(
        dataset.validate_partial(&["video".to_string()], &ValidateOptions::default()),
        Err(DatasetError::UnknownRemote { .. })
    );
}

#[test]
fn unknown_version_fails_on_first_use() {
    let fixture = Fixture::new(&flat_index());
    let dataset = fixture.dataset::<()>(Loaders::new()).with_version("0.1");
    assert_matches!(dataset.track_ids(), Err(DatasetError::UnknownVersion { .. }));
}

#[test]
fn multitracks_and_records() {
    let index = format!(
        r#"{{
            "version": "1.0",
            "tracks": {{
                "s1": {{"stem": ["stems/s1.wav", "{digest}"]}},
                "s2": {{"stem": ["stems/s2.wav", "{digest}"]}}
            }},
            "multitracks": {{
                "mt": {{"tracks": ["s1", "s2"], "mix": ["mix/mt.wav", "{digest}"]}}
            }},
            "records": {{
                "r1": {{"data": ["records/r1.csv", "{digest}"]}}
            }}
        }}"#,
        digest = md5_bytes(b"x"),
    );
    let fixture = Fixture::new(&index);
    let dataset = fixture.dataset::<()>(Loaders::new());
    assert_eq!(dataset.manifest().unwrap().shape(), ManifestShape::Multitrack);

    assert_eq!(dataset.multitrack_ids().unwrap(), vec!["mt"]);
    let multitrack = dataset.multitrack("mt").unwrap();
    assert_eq!(multitrack.track_ids(), ["s1", "s2"]);
    assert_eq!(
        multitrack.path("mix").unwrap(),
        Some(fixture.root.join("mix/mt.wav").as_path())
    );
    let members = multitrack.tracks().unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(members[1].id(), "s2");
    assert_matches!(multitrack.track("r1"), Err(DatasetError::UnknownId { .. }));
    assert_eq!(dataset.load_multitracks().unwrap().len(), 1);
    assert_eq!(
        dataset.choose_random_multitrack(Some(1)).unwrap().id(),
        "mt"
    );

    assert_eq!(dataset.record_ids().unwrap(), vec!["r1"]);
    let record = dataset.record("r1").unwrap();
    assert_eq!(
        record.path("data").unwrap(),
        Some(fixture.root.join("records/r1.csv").as_path())
    );
    assert_eq!(dataset.load_records().unwrap().len(), 1);
}

#[test]
fn empty_multitrack_section_cannot_be_sampled() {
    let fixture = Fixture::new(&flat_index());
    let dataset = fixture.dataset::<()>(Loaders::new());
    assert_matches!(
        dataset.choose_random_multitrack(None),
        Err(DatasetError::EmptySection("multitrack"))
    );
}

#[test]
fn single_track_round_trip() {
    let index = format!(
        r#"{{"version":"1.0","tracks":{{"t1":{{"audio":["audio/t1.wav","{}"],"ann":null}}}}}}"#,
        md5_bytes(b"RIFF....WAVE")
    );
    let fixture = Fixture::new(&index);
    fixture.write("audio/t1.wav", b"RIFF....WAVE");
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let loaders = Loaders::new().with("audio", move |path: &Utf8Path| {
        recorder.lock().unwrap().push(path.to_path_buf());
        Ok(Some(fs::read(path).unwrap().len()))
    });
    let dataset = fixture.dataset(loaders);

    let report = dataset.validate(&ValidateOptions::default()).unwrap();
    assert!(report.missing_files.is_empty());
    assert!(report.invalid_checksums.is_empty());

    let track = dataset.track("t1").unwrap();
    assert_eq!(track.path("ann").unwrap(), None);
    assert_eq!(track.value("audio").unwrap(), Some(&12));
    assert_eq!(track.value("audio").unwrap(), Some(&12));
    assert_eq!(*seen.lock().unwrap(), vec![fixture.root.join("audio/t1.wav")]);
}
