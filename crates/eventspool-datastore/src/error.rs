//! Error types for the datastore.

use eventspool_storage::StorageError;
use thiserror::Error;

/// Result type alias for datastore operations.
pub type DataStoreResult<T> = Result<T, DataStoreError>;

/// Error variants for datastore operations.
#[derive(Debug, Error)]
pub enum DataStoreError {
    /// Failure in the underlying storage layer.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A TLV record is malformed.
    #[error("Corrupt record: {reason}")]
    CorruptData {
        /// Description of the corruption.
        reason: String,
    },

    /// The record is older than the expiry window or has another version.
    #[error("Stale or version mismatch: {reason}")]
    StaleOrVersionMismatch {
        /// Description of the mismatch.
        reason: String,
    },

    /// The value could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The key cannot be used as a file name.
    #[error("Invalid key: {0:?}")]
    InvalidKey(String),
}

impl From<serde_json::Error> for DataStoreError {
    fn from(err: serde_json::Error) -> Self {
        DataStoreError::Serialization(err.to_string())
    }
}
