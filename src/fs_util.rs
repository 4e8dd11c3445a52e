use std::fs;
use std::io::{self, Read};
use std::path::Path;

use camino::{Utf8Component, Utf8Path};
use flate2::read::GzDecoder;
use tar::Archive;
use zip::ZipArchive;

use crate::error::DatasetError;

pub fn is_contained(path: &Utf8Path) -> bool {
    path.components().next().is_some()
        && path.components().all(|component| {
            matches!(component, Utf8Component::Normal(_) | Utf8Component::CurDir)
        })
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<usize, DatasetError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        DatasetError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| DatasetError::Filesystem(err.to_string()))?;

    let mut extracted = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| DatasetError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(DatasetError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| DatasetError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| DatasetError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| DatasetError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| DatasetError::Filesystem(err.to_string()))?;
        extracted += 1;
    }
    Ok(extracted)
}

/// Extracts a plain or gzip-compressed tarball. `unpack_in` refuses entries
/// that would land outside `target_dir`.
pub fn extract_tar(tar_path: &Path, target_dir: &Path) -> Result<usize, DatasetError> {
    let file = fs::File::open(tar_path).map_err(|err| {
        DatasetError::Filesystem(format!("open tar {}: {err}", tar_path.display()))
    })?;
    let reader: Box<dyn Read> = if is_gzip(tar_path) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    fs::create_dir_all(target_dir).map_err(|err| DatasetError::Filesystem(err.to_string()))?;

    let mut archive = Archive::new(reader);
    let mut extracted = 0usize;
    let entries = archive
        .entries()
        .map_err(|err| DatasetError::Filesystem(err.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|err| DatasetError::Filesystem(err.to_string()))?;
        let is_file = entry.header().entry_type().is_file();
        let unpacked = entry
            .unpack_in(target_dir)
            .map_err(|err| DatasetError::Filesystem(err.to_string()))?;
        if !unpacked {
            return Err(DatasetError::Filesystem(
                "tar entry path traversal detected".to_string(),
            ));
        }
        if is_file {
            extracted += 1;
        }
    }
    Ok(extracted)
}

fn is_gzip(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    name.ends_with(".gz") || name.ends_with(".tgz")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    #[test]
    fn contained_paths() {
        assert!(is_contained(Utf8Path::new("audio/t1.wav")));
        assert!(is_contained(Utf8Path::new("./meta.csv")));
        assert!(!is_contained(Utf8Path::new("")));
        assert!(!is_contained(Utf8Path::new("/etc/passwd")));
        assert!(!is_contained(Utf8Path::new("../outside.bin")));
        assert!(!is_contained(Utf8Path::new("audio/../../outside.bin")));
    }

    #[test]
    fn extract_zip_roundtrip() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("audio.zip");
        let mut writer = zip::ZipWriter::new(fs::File::create(&zip_path).unwrap());
        writer
            .start_file("audio/t1.wav", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"RIFF").unwrap();
        writer.finish().unwrap();

        let target = temp.path().join("out");
        assert_eq!(extract_zip(&zip_path, &target).unwrap(), 1);
        assert_eq!(fs::read(target.join("audio/t1.wav")).unwrap(), b"RIFF");
    }

    #[test]
    fn extract_tar_gz() {
        let temp = tempfile::tempdir().unwrap();
        let tar_path = temp.path().join("ann.tar.gz");
        let encoder = GzEncoder::new(fs::File::create(&tar_path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let content = b"0.5,1\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "ann/t1.csv", &content[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let target = temp.path().join("out");
        assert_eq!(extract_tar(&tar_path, &target).unwrap(), 1);
        assert_eq!(fs::read(target.join("ann/t1.csv")).unwrap(), content);
    }
}
