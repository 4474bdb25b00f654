//! Batch file format and plain (unencrypted) file readers/writers.
//!
//! A batch file is a sequence of records, each `[length:u32 BE][payload]`,
//! appended in event arrival order. A record whose length carries
//! [`EVENT_METADATA_FLAG`] holds the per-event metadata of the record that
//! follows it; files written without per-event metadata are exactly the
//! `[length][payload]` sequence.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use tracing::{error, warn};

use crate::error::{StorageError, StorageResult};
use crate::file_ops;

/// Size of the record length prefix.
pub const RECORD_HEADER_SIZE: usize = 4;

/// Top bit of the length prefix marks a per-event metadata record.
pub const EVENT_METADATA_FLAG: u32 = 0x8000_0000;

const MAX_RECORD_LEN: u32 = !EVENT_METADATA_FLAG;

/// One event as stored in a batch: opaque payload plus optional per-event metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBatchEvent {
    /// Serialized event payload.
    pub data: Vec<u8>,
    /// Per-event metadata, empty when absent.
    pub metadata: Vec<u8>,
}

impl RawBatchEvent {
    /// Event without metadata.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            metadata: Vec::new(),
        }
    }

    /// Event with per-event metadata.
    pub fn with_metadata(data: impl Into<Vec<u8>>, metadata: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            metadata: metadata.into(),
        }
    }
}

/// Reads and writes whole events in batch files.
pub trait BatchFileReaderWriter: Send + Sync {
    /// Writes one event. Never panics or propagates I/O errors; returns `false` instead.
    fn write_event(&self, file: &Path, event: &RawBatchEvent, append: bool) -> bool;

    /// Decodes every complete event in the file, in write order.
    fn read_events(&self, file: &Path) -> Vec<RawBatchEvent>;
}

/// Reads and writes opaque single-blob files (batch metadata, datastore records).
pub trait FileReaderWriter: Send + Sync {
    /// Writes `data`, appending or overwriting. Returns `false` on failure.
    fn write_data(&self, file: &Path, data: &[u8], append: bool) -> bool;

    /// Reads the whole file. Returns an empty vector on failure.
    fn read_data(&self, file: &Path) -> Vec<u8>;
}

/// Encodes one event as its record(s).
pub fn encode_event(event: &RawBatchEvent) -> StorageResult<Vec<u8>> {
    let mut out = Vec::with_capacity(
        event.data.len() + event.metadata.len() + 2 * RECORD_HEADER_SIZE,
    );
    if !event.metadata.is_empty() {
        let len = record_len(event.metadata.len())?;
        out.extend_from_slice(&(len | EVENT_METADATA_FLAG).to_be_bytes());
        out.extend_from_slice(&event.metadata);
    }
    let len = record_len(event.data.len())?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&event.data);
    Ok(out)
}

fn record_len(len: usize) -> StorageResult<u32> {
    u32::try_from(len)
        .ok()
        .filter(|l| *l <= MAX_RECORD_LEN)
        .ok_or_else(|| StorageError::InvalidConfig(format!("record of {} bytes is too large", len)))
}

/// Outcome of decoding a batch buffer.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DecodedBatch {
    /// Events decoded before the end of the buffer or the first bad record.
    pub events: Vec<RawBatchEvent>,
    /// Whether the whole buffer was consumed cleanly.
    pub complete: bool,
}

/// Decodes records sequentially; a truncated or malformed tail is dropped.
pub fn decode_events(bytes: &[u8]) -> DecodedBatch {
    let mut events = Vec::new();
    let mut pending_meta: Option<Vec<u8>> = None;
    let mut cursor = 0usize;

    while cursor < bytes.len() {
        let Some(header) = bytes.get(cursor..cursor + RECORD_HEADER_SIZE) else {
            return DecodedBatch { events, complete: false };
        };
        let raw = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let is_meta = raw & EVENT_METADATA_FLAG != 0;
        let len = (raw & MAX_RECORD_LEN) as usize;
        let start = cursor + RECORD_HEADER_SIZE;
        let Some(payload) = bytes.get(start..start + len) else {
            return DecodedBatch { events, complete: false };
        };
        cursor = start + len;

        if is_meta {
            if pending_meta.is_some() {
                return DecodedBatch { events, complete: false };
            }
            pending_meta = Some(payload.to_vec());
        } else {
            events.push(RawBatchEvent {
                data: payload.to_vec(),
                metadata: pending_meta.take().unwrap_or_default(),
            });
        }
    }

    DecodedBatch {
        complete: pending_meta.is_none(),
        events,
    }
}

/// Exclusive advisory lock on an open file, released on drop.
pub(crate) struct FileLockGuard<'a> {
    #[cfg_attr(not(unix), allow(dead_code))]
    file: &'a File,
}

impl<'a> FileLockGuard<'a> {
    pub(crate) fn acquire(file: &'a File) -> io::Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: the descriptor is owned by `file`, which outlives the guard.
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(Self { file })
    }
}

impl Drop for FileLockGuard<'_> {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: see `acquire`.
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}

/// Writes `bytes` under an exclusive advisory lock.
///
/// On append failure the file is truncated back to its previous length so a
/// partial record never survives.
pub(crate) fn locked_write(path: &Path, bytes: &[u8], append: bool) -> StorageResult<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .open(path)
        .map_err(|e| StorageError::from_io(path, e))?;
    let _lock = FileLockGuard::acquire(&file).map_err(|e| StorageError::from_io(path, e))?;

    if append {
        let previous_len = file.metadata().map(|m| m.len()).unwrap_or(0);
        let mut writer = &file;
        if let Err(e) = writer.write_all(bytes) {
            if let Err(truncate_err) = file.set_len(previous_len) {
                error!(path = %path.display(), error = %truncate_err, "failed to roll back partial append");
            }
            return Err(StorageError::from_io(path, e));
        }
    } else {
        file.set_len(0).map_err(|e| StorageError::from_io(path, e))?;
        let mut writer = &file;
        writer
            .write_all(bytes)
            .map_err(|e| StorageError::from_io(path, e))?;
    }
    Ok(())
}

fn check_writable_target(path: &Path) -> StorageResult<()> {
    match path.parent() {
        Some(parent) if file_ops::is_dir_safe(parent) => {}
        _ => {
            return Err(StorageError::IoError(io::Error::new(
                io::ErrorKind::NotFound,
                "parent directory does not exist",
            )))
        }
    }
    if file_ops::is_dir_safe(path) {
        return Err(StorageError::IoError(io::Error::new(
            io::ErrorKind::InvalidInput,
            "target is a directory",
        )));
    }
    Ok(())
}

fn read_existing(path: &Path) -> Option<Vec<u8>> {
    if !file_ops::is_file_safe(path) {
        warn!(path = %path.display(), "read target does not exist or is not a file");
        return None;
    }
    file_ops::read_bytes_safe(path)
}

/// Plain batch codec: length-prefixed records, no encryption.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainBatchFileReaderWriter;

impl BatchFileReaderWriter for PlainBatchFileReaderWriter {
    fn write_event(&self, file: &Path, event: &RawBatchEvent, append: bool) -> bool {
        let result = check_writable_target(file)
            .and_then(|_| encode_event(event))
            .and_then(|bytes| locked_write(file, &bytes, append));
        match result {
            Ok(()) => true,
            Err(e) => {
                error!(path = %file.display(), error = %e, "failed to write batch event");
                false
            }
        }
    }

    fn read_events(&self, file: &Path) -> Vec<RawBatchEvent> {
        let Some(bytes) = read_existing(file) else {
            return Vec::new();
        };
        let decoded = decode_events(&bytes);
        if !decoded.complete {
            let err = StorageError::CorruptData {
                path: file.to_path_buf(),
                reason: "truncated or malformed trailing record".to_string(),
            };
            error!(
                error = %err,
                recovered = decoded.events.len(),
                "not all batch data could be read, dropping corrupt tail"
            );
        }
        decoded.events
    }
}

/// Plain single-blob reader/writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFileReaderWriter;

impl FileReaderWriter for PlainFileReaderWriter {
    fn write_data(&self, file: &Path, data: &[u8], append: bool) -> bool {
        match check_writable_target(file).and_then(|_| locked_write(file, data, append)) {
            Ok(()) => true,
            Err(e) => {
                error!(path = %file.display(), error = %e, "failed to write file");
                false
            }
        }
    }

    fn read_data(&self, file: &Path) -> Vec<u8> {
        read_existing(file).unwrap_or_default()
    }
}
