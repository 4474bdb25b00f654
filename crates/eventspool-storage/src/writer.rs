//! Writers handed to producers inside `write_current_batch`.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::batch_codec::{BatchFileReaderWriter, FileReaderWriter, RawBatchEvent};
use crate::file_ops;

/// Kind of event being written. Only used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EventType {
    /// Regular telemetry.
    #[default]
    Default,
    /// Crash report, written right before the process dies.
    Crash,
}

/// Appends events to the batch selected for this write.
pub trait EventBatchWriter {
    /// Current content of the batch metadata, if any.
    fn current_metadata(&self) -> Option<Vec<u8>>;

    /// Appends `event` and, when given and non-empty, overwrites the batch metadata.
    fn write(&self, event: &RawBatchEvent, batch_metadata: Option<&[u8]>, event_type: EventType)
        -> bool;
}

/// Writer bound to one batch file and its metadata file.
pub struct FileEventBatchWriter {
    batch_file: PathBuf,
    metadata_file: Option<PathBuf>,
    batch_writer: Arc<dyn BatchFileReaderWriter>,
    metadata_writer: Arc<dyn FileReaderWriter>,
    max_item_size: u64,
}

impl FileEventBatchWriter {
    /// Writer for `batch_file`.
    pub fn new(
        batch_file: PathBuf,
        metadata_file: Option<PathBuf>,
        batch_writer: Arc<dyn BatchFileReaderWriter>,
        metadata_writer: Arc<dyn FileReaderWriter>,
        max_item_size: u64,
    ) -> Self {
        Self {
            batch_file,
            metadata_file,
            batch_writer,
            metadata_writer,
            max_item_size,
        }
    }

    fn write_batch_metadata(&self, metadata: &[u8]) {
        let Some(metadata_file) = &self.metadata_file else {
            return;
        };
        if !self.metadata_writer.write_data(metadata_file, metadata, false) {
            warn!(path = %metadata_file.display(), "unable to write batch metadata");
        }
    }
}

impl EventBatchWriter for FileEventBatchWriter {
    fn current_metadata(&self) -> Option<Vec<u8>> {
        let metadata_file = self.metadata_file.as_ref()?;
        if !file_ops::exists_safe(metadata_file) {
            return None;
        }
        Some(self.metadata_writer.read_data(metadata_file))
    }

    fn write(
        &self,
        event: &RawBatchEvent,
        batch_metadata: Option<&[u8]>,
        event_type: EventType,
    ) -> bool {
        if event.data.is_empty() {
            return true;
        }
        let size = event.data.len() as u64;
        if size > self.max_item_size {
            error!(
                size,
                max_item_size = self.max_item_size,
                ?event_type,
                "event too large to be written"
            );
            return false;
        }

        let written = self.batch_writer.write_event(&self.batch_file, event, true);
        if !written {
            debug!(path = %self.batch_file.display(), ?event_type, "event append failed");
            return false;
        }
        if let Some(metadata) = batch_metadata.filter(|m| !m.is_empty()) {
            self.write_batch_metadata(metadata);
        }
        true
    }
}

/// Writer that accepts and discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventBatchWriter;

impl EventBatchWriter for NoOpEventBatchWriter {
    fn current_metadata(&self) -> Option<Vec<u8>> {
        None
    }

    fn write(&self, _event: &RawBatchEvent, _batch_metadata: Option<&[u8]>, _event_type: EventType)
        -> bool {
        true
    }
}
