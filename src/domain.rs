use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

impl Checksum {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, digest: &str) -> bool {
        self.0.eq_ignore_ascii_case(digest)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Checksum {
    type Err = DatasetError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        let is_valid = !normalized.is_empty() && normalized.chars().all(|ch| ch.is_ascii_hexdigit());
        if !is_valid {
            return Err(DatasetError::InvalidChecksum(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for Checksum {
    type Error = DatasetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Checksum> for String {
    fn from(value: Checksum) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    #[default]
    None,
    Zip,
    Tar,
}

impl ArchiveKind {
    pub fn from_filename(filename: &str) -> Self {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            ArchiveKind::Zip
        } else if lower.ends_with(".tar")
            || lower.ends_with(".tar.gz")
            || lower.ends_with(".tgz")
        {
            ArchiveKind::Tar
        } else {
            ArchiveKind::None
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveKind::None => write!(f, "none"),
            ArchiveKind::Zip => write!(f, "zip"),
            ArchiveKind::Tar => write!(f, "tar"),
        }
    }
}

pub const DEFAULT_VERSION: &str = "default";
pub const TEST_VERSION: &str = "test";

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_checksum_normalizes_case() {
        let checksum: Checksum = " ABC123 ".parse().unwrap();
        assert_eq!(checksum.as_str(), "abc123");
        assert!(checksum.matches("ABC123"));
    }

    #[test]
    fn parse_checksum_rejects_non_hex() {
        assert_matches!(
            "not-a-digest".parse::<Checksum>(),
            Err(DatasetError::InvalidChecksum(_))
        );
        assert_matches!("".parse::<Checksum>(), Err(DatasetError::InvalidChecksum(_)));
    }

    #[test]
    fn archive_kind_from_filename() {
        assert_eq!(ArchiveKind::from_filename("audio.ZIP"), ArchiveKind::Zip);
        assert_eq!(ArchiveKind::from_filename("ann.tar.gz"), ArchiveKind::Tar);
        assert_eq!(ArchiveKind::from_filename("meta.csv"), ArchiveKind::None);
    }
}
