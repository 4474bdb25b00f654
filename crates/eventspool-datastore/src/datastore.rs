//! Versioned, time-bounded key-value records, one file per key.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eventspool_storage::encryption::file_reader_writer;
use eventspool_storage::{file_ops, FileReaderWriter, StorageContext, TimeProvider};
use tracing::{debug, error, warn};

use crate::error::{DataStoreError, DataStoreResult};
use crate::serializer::{DataDeserializer, DataSerializer};
use crate::tlv::{decode_blocks, encode_blocks, validate_record, TlvBlock, TlvBlockType};

/// Version of the on-disk datastore layout, part of the directory name.
pub const DATASTORE_FORMAT_VERSION: u32 = 0;

/// Records older than this are treated as absent and deleted.
pub const DATASTORE_EXPIRY_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// Requested version that accepts any stored version.
pub const ANY_VERSION: u32 = 0;

/// A decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataStoreContent<T> {
    /// Write time of the record in milliseconds.
    pub last_update_ms: u64,
    /// Version the value was written with.
    pub version_code: u32,
    /// The value.
    pub data: T,
}

/// Outcome of a datastore read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataStoreRead<T> {
    /// A fresh record with a matching version.
    Value(DataStoreContent<T>),
    /// No usable record. Stale and mismatched records end up here after deletion.
    NoData,
    /// The record exists but cannot be decoded.
    Failure,
}

impl<T> DataStoreRead<T> {
    /// The value, if any.
    pub fn into_value(self) -> Option<T> {
        match self {
            DataStoreRead::Value(content) => Some(content.data),
            _ => None,
        }
    }
}

/// Synchronous datastore of one feature. Blocking file I/O on every call.
pub struct DataStoreFileHandler {
    dir: PathBuf,
    clock: Arc<dyn TimeProvider>,
    file_io: Arc<dyn FileReaderWriter>,
}

impl DataStoreFileHandler {
    /// Datastore under `<storage_dir>/<instance>/<feature>/datastore_v<N>/`.
    pub fn new(context: &StorageContext, feature: &str) -> Self {
        let dir = context
            .feature_dir(feature)
            .join(format!("datastore_v{}", DATASTORE_FORMAT_VERSION));
        Self::with_parts(dir, context.clock.clone(), file_reader_writer(context.encryption.clone()))
    }

    /// Datastore in `dir` with explicit collaborators.
    pub fn with_parts(
        dir: PathBuf,
        clock: Arc<dyn TimeProvider>,
        file_io: Arc<dyn FileReaderWriter>,
    ) -> Self {
        Self { dir, clock, file_io }
    }

    /// Directory holding the record files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `value` under `key`, replacing any previous record.
    ///
    /// Nothing is written when serialization fails.
    pub fn write<T>(
        &self,
        key: &str,
        value: &T,
        serializer: &dyn DataSerializer<T>,
        version: u32,
    ) -> bool {
        match self.try_write(key, value, serializer, version) {
            Ok(written) => written,
            Err(e) => {
                error!(key, error = %e, "datastore write failed");
                false
            }
        }
    }

    fn try_write<T>(
        &self,
        key: &str,
        value: &T,
        serializer: &dyn DataSerializer<T>,
        version: u32,
    ) -> DataStoreResult<bool> {
        let path = self.key_path(key)?;
        let data = serializer.serialize(value)?;
        let bytes = encode_blocks(&[
            TlvBlock::new(
                TlvBlockType::LastUpdateDate,
                self.clock.now_ms().to_be_bytes().to_vec(),
            ),
            TlvBlock::new(TlvBlockType::VersionCode, version.to_be_bytes().to_vec()),
            TlvBlock::new(TlvBlockType::Data, data),
        ])?;

        if !file_ops::exists_safe(&self.dir) && !file_ops::mkdirs_safe(&self.dir) {
            return Ok(false);
        }
        let written = self.file_io.write_data(&path, &bytes, false);
        debug!(key, version, written, "datastore record written");
        Ok(written)
    }

    /// Reads the record under `key`.
    ///
    /// `version` [`ANY_VERSION`] accepts any stored version. A stale record or
    /// one with another version is deleted and reported as [`DataStoreRead::NoData`].
    pub fn read<T>(
        &self,
        key: &str,
        deserializer: &dyn DataDeserializer<T>,
        version: u32,
    ) -> DataStoreRead<T> {
        let path = match self.key_path(key) {
            Ok(path) => path,
            Err(e) => {
                error!(key, error = %e, "datastore read refused");
                return DataStoreRead::Failure;
            }
        };
        if !file_ops::exists_safe(&path) {
            return DataStoreRead::NoData;
        }

        let blocks = decode_blocks(&self.file_io.read_data(&path));
        let content = parse_record(&blocks, deserializer)
            .and_then(|content| self.check_usable(content, version));
        match content {
            Ok(content) => DataStoreRead::Value(content),
            Err(DataStoreError::StaleOrVersionMismatch { reason }) => {
                warn!(key, %reason, "discarding datastore record");
                file_ops::delete_safe(&path);
                DataStoreRead::NoData
            }
            Err(e) => {
                error!(key, error = %e, "datastore record unreadable");
                DataStoreRead::Failure
            }
        }
    }

    /// Deletes the record under `key`. Returns whether a file was removed.
    pub fn remove(&self, key: &str) -> bool {
        match self.key_path(key) {
            Ok(path) => file_ops::exists_safe(&path) && file_ops::delete_safe(&path),
            Err(e) => {
                error!(key, error = %e, "datastore remove refused");
                false
            }
        }
    }

    fn check_usable<T>(
        &self,
        content: DataStoreContent<T>,
        version: u32,
    ) -> DataStoreResult<DataStoreContent<T>> {
        if version != ANY_VERSION && content.version_code != version {
            return Err(DataStoreError::StaleOrVersionMismatch {
                reason: format!(
                    "stored version {} but {} requested",
                    content.version_code, version
                ),
            });
        }
        let age = self.clock.now_ms().saturating_sub(content.last_update_ms);
        if age > DATASTORE_EXPIRY_MS {
            return Err(DataStoreError::StaleOrVersionMismatch {
                reason: format!("record is {} ms old", age),
            });
        }
        Ok(content)
    }

    fn key_path(&self, key: &str) -> DataStoreResult<PathBuf> {
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && !key.contains(|c: char| matches!(c, '/' | '\\' | '\0'));
        if !valid {
            return Err(DataStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }
}

fn parse_record<T>(
    blocks: &[TlvBlock],
    deserializer: &dyn DataDeserializer<T>,
) -> DataStoreResult<DataStoreContent<T>> {
    validate_record(blocks)?;
    let last_update = <[u8; 8]>::try_from(blocks[0].data.as_slice()).map_err(|_| {
        DataStoreError::CorruptData {
            reason: format!("{} block has {} bytes", blocks[0].block_type, blocks[0].data.len()),
        }
    })?;
    let version = <[u8; 4]>::try_from(blocks[1].data.as_slice()).map_err(|_| {
        DataStoreError::CorruptData {
            reason: format!("{} block has {} bytes", blocks[1].block_type, blocks[1].data.len()),
        }
    })?;
    Ok(DataStoreContent {
        last_update_ms: u64::from_be_bytes(last_update),
        version_code: u32::from_be_bytes(version),
        data: deserializer.deserialize(&blocks[2].data)?,
    })
}
