//! Error types for the storage subsystem.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error variants for storage operations.
///
/// Most of these never leave the crate: the public storage boundary logs them
/// and converts them to sentinel values (`false`, `None`, empty lists).
#[derive(Debug, Error)]
pub enum StorageError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The sandbox or file permissions denied the operation.
    #[error("Permission denied on {path}")]
    PermissionDenied {
        /// Path the operation targeted.
        path: PathBuf,
    },

    /// A batch record or TLV block could not be decoded.
    #[error("Corrupt data in {path}: {reason}")]
    CorruptData {
        /// File holding the corrupt data.
        path: PathBuf,
        /// Description of the corruption.
        reason: String,
    },

    /// No writable file could be obtained, even after eviction.
    #[error("Quota exceeded: {used} bytes used, {limit} bytes allowed")]
    QuotaExceeded {
        /// Bytes currently on disk under the root.
        used: u64,
        /// Configured maximum disk space.
        limit: u64,
    },

    /// Encryption or decryption failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Append writes are refused by whole-file encrypted writers.
    #[error("Append mode is not supported by encrypted writer for {path}")]
    AppendNotSupported {
        /// File the append targeted.
        path: PathBuf,
    },

    /// Configuration value is out of range.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Configuration could not be parsed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The feature task queue was shut down before the task ran.
    #[error("Task queue '{queue}' is closed")]
    QueueClosed {
        /// Name of the queue.
        queue: String,
    },
}

impl StorageError {
    /// Maps an I/O error on `path`, lifting permission failures into their own variant.
    pub fn from_io(path: &std::path::Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            StorageError::PermissionDenied {
                path: path.to_path_buf(),
            }
        } else {
            StorageError::IoError(err)
        }
    }
}
