use std::fs::File;
use std::io::Read;

use camino::Utf8Path;
use md5::{Digest, Md5};

use crate::error::DatasetError;

const CHUNK_SIZE: usize = 1024 * 1024;

pub fn md5_file(path: &Utf8Path) -> Result<String, DatasetError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| DatasetError::Filesystem(format!("open {path}: {err}")))?;
    md5_reader(file).map_err(|err| DatasetError::Filesystem(format!("read {path}: {err}")))
}

pub fn md5_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn md5_bytes(content: &[u8]) -> String {
    hex::encode(Md5::digest(content))
}
