//! Batch identity types.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::batch_codec::RawBatchEvent;

/// Suffix appended to a batch file name to obtain its metadata file.
pub const METADATA_SUFFIX: &str = "_metadata";

/// Identity of a batch, taken once from its file name.
///
/// Batch files are named by their creation time in milliseconds, so the
/// identity also carries that timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId {
    created_at_ms: u64,
    name: String,
}

impl BatchId {
    /// Parses the identity of a batch file. `None` if the name is not a batch file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        Self::from_name(name)
    }

    /// Parses a bare file name.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let created_at_ms = name.parse::<u64>().ok()?;
        Some(Self {
            created_at_ms,
            name: name.to_string(),
        })
    }

    /// Identity for a freshly created batch.
    pub fn from_timestamp(created_at_ms: u64) -> Self {
        Self {
            created_at_ms,
            name: created_at_ms.to_string(),
        }
    }

    /// Creation time encoded in the file name.
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// File name of the batch.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Whether `path` names this batch, in any directory.
    pub fn matches(&self, path: &Path) -> bool {
        path.file_name().and_then(|n| n.to_str()) == Some(self.name.as_str())
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A batch file on disk together with its parsed identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchFile {
    /// Identity taken from the file name.
    pub id: BatchId,
    /// Full path of the batch file.
    pub path: PathBuf,
}

impl BatchFile {
    /// Wraps `path` if it names a batch file.
    pub fn from_path(path: PathBuf) -> Option<Self> {
        let id = BatchId::from_path(&path)?;
        Some(Self { id, path })
    }

    /// Batch file named `id` inside `dir`.
    pub fn in_dir(dir: &Path, id: BatchId) -> Self {
        let path = dir.join(id.as_str());
        Self { id, path }
    }

    /// Sibling file holding the batch metadata. Pure path derivation, no I/O.
    pub fn metadata_path(&self) -> PathBuf {
        metadata_path_for(&self.path)
    }
}

/// `<batch>_metadata` next to `batch_file`.
pub fn metadata_path_for(batch_file: &Path) -> PathBuf {
    let mut name = batch_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(METADATA_SUFFIX);
    batch_file.with_file_name(name)
}

/// A batch checked out for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchData {
    /// Identity to hand back to `confirm_batch_read`.
    pub id: BatchId,
    /// Events in write order.
    pub events: Vec<RawBatchEvent>,
    /// Content of the batch metadata file, if any.
    pub metadata: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_names_are_batches() {
        let id = BatchId::from_path(Path::new("/root/granted/1700000000000")).unwrap();
        assert_eq!(id.created_at_ms(), 1_700_000_000_000);
        assert_eq!(id.as_str(), "1700000000000");
    }

    #[test]
    fn test_non_numeric_names_are_not_batches() {
        assert!(BatchId::from_name("1700000000000_metadata").is_none());
        assert!(BatchId::from_name("abc").is_none());
        assert!(BatchId::from_name("").is_none());
        assert!(BatchId::from_name("-12").is_none());
    }

    #[test]
    fn test_metadata_path_is_sibling() {
        let file = BatchFile::in_dir(Path::new("/r/granted"), BatchId::from_timestamp(42));
        assert_eq!(file.path, PathBuf::from("/r/granted/42"));
        assert_eq!(file.metadata_path(), PathBuf::from("/r/granted/42_metadata"));
    }

    #[test]
    fn test_matches_ignores_directory() {
        let id = BatchId::from_timestamp(42);
        assert!(id.matches(Path::new("/a/42")));
        assert!(id.matches(Path::new("/b/42")));
        assert!(!id.matches(Path::new("/a/43")));
    }

    #[test]
    fn test_ordering_is_by_creation_time() {
        let older = BatchId::from_timestamp(9);
        let newer = BatchId::from_timestamp(10);
        assert!(older < newer);
    }
}
