//! Consent-aware batch storage of one feature.
//!
//! This is the synchronous core. Every method does blocking file I/O and is
//! meant to run on the feature's [`FeatureQueue`](crate::queue::FeatureQueue),
//! see [`FeatureStorageHandle`](crate::handle::FeatureStorageHandle).

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::batch::{BatchData, BatchFile, BatchId};
use crate::batch_codec::{BatchFileReaderWriter, FileReaderWriter};
use crate::config::{FilePersistenceConfig, StorageContext};
use crate::consent::{ConsentRoutes, TrackingConsent, GRANTED_DIR, PENDING_DIR};
use crate::encryption::{batch_reader_writer, file_reader_writer};
use crate::file_ops;
use crate::lock_registry::LockedBatches;
use crate::metrics::RemovalReason;
use crate::orchestrator::BatchFileOrchestrator;
use crate::writer::{EventBatchWriter, FileEventBatchWriter, NoOpEventBatchWriter};

/// Routes writes by consent and serves batches to the uploader.
pub struct ConsentAwareStorage {
    feature: String,
    config: FilePersistenceConfig,
    routes: ConsentRoutes,
    granted: Arc<BatchFileOrchestrator>,
    locks: Arc<LockedBatches>,
    batch_io: Arc<dyn BatchFileReaderWriter>,
    metadata_io: Arc<dyn FileReaderWriter>,
    write_lock: Mutex<()>,
}

impl ConsentAwareStorage {
    /// Storage for `feature` under `<storage_dir>/<instance>/<feature>/`.
    ///
    /// Runs the initial consent migration, which wipes pending data left by a
    /// previous process.
    pub fn new(context: &StorageContext, feature: &str) -> Self {
        let feature_dir = context.feature_dir(feature);
        let locks = Arc::new(LockedBatches::new());
        let orchestrator = |dir: &str| {
            Arc::new(BatchFileOrchestrator::new(
                feature_dir.join(dir),
                context.persistence.clone(),
                context.clock.clone(),
                context.metrics.clone(),
                locks.clone(),
            ))
        };
        let granted = orchestrator(GRANTED_DIR);
        let pending = orchestrator(PENDING_DIR);
        let routes = ConsentRoutes::new(granted.clone(), pending);
        routes.migrate(None, TrackingConsent::Pending);

        info!(feature, dir = %feature_dir.display(), "feature storage ready");
        Self {
            feature: feature.to_string(),
            config: context.persistence.clone(),
            routes,
            granted,
            locks,
            batch_io: batch_reader_writer(context.encryption.clone()),
            metadata_io: file_reader_writer(context.encryption.clone()),
            write_lock: Mutex::new(()),
        }
    }

    /// Feature name.
    pub fn feature(&self) -> &str {
        &self.feature
    }

    /// Root holding uploadable batches.
    pub fn granted_dir(&self) -> Option<PathBuf> {
        self.granted.root_dir().map(|p| p.to_path_buf())
    }

    /// Runs `action` with a writer for the batch selected under `consent`.
    ///
    /// `action` runs under the feature write mutex so a batch file and its
    /// metadata file are updated together. Without a writable file the writer
    /// discards everything.
    pub fn write_current_batch<R>(
        &self,
        consent: TrackingConsent,
        force_new_batch: bool,
        action: impl FnOnce(&dyn EventBatchWriter) -> R,
    ) -> R {
        let Some(orchestrator) = self.routes.route(consent).write_target() else {
            return action(&NoOpEventBatchWriter);
        };

        let _guard = self.write_lock.lock();
        match orchestrator.writable_file(force_new_batch) {
            Some(file) => {
                let writer = FileEventBatchWriter::new(
                    file.path.clone(),
                    orchestrator.metadata_file(&file.path),
                    self.batch_io.clone(),
                    self.metadata_io.clone(),
                    self.config.max_item_size,
                );
                action(&writer)
            }
            None => {
                warn!(feature = %self.feature, %consent, "no writable batch file, dropping write");
                action(&NoOpEventBatchWriter)
            }
        }
    }

    /// Locks and decodes the oldest readable granted batch.
    pub fn read_next_batch(&self) -> Option<BatchData> {
        let source = self.routes.route(TrackingConsent::Granted).read_source()?;
        loop {
            let file = self.locks.lock_next(|exclude| source.readable_file(exclude))?;
            let batch = self.load_batch(&file);
            if !batch.events.is_empty() || file_ops::length_safe(&file.path) == 0 {
                return Some(batch);
            }
            // Non-empty file with nothing decodable: corrupt or encrypted with another key.
            warn!(batch = %file.id, "batch has no readable events, discarding");
            if !source.delete_batch(&file, RemovalReason::Invalid) {
                return Some(batch);
            }
            self.locks.release(&file.id);
        }
    }

    /// Releases a batch handed out by [`read_next_batch`](Self::read_next_batch),
    /// deleting it when `delete` is set. The lock is released even if deletion fails.
    pub fn confirm_batch_read(&self, id: &BatchId, reason: RemovalReason, delete: bool) {
        let Some(locked_path) = self.locks.locked_paths().into_iter().find(|p| id.matches(p))
        else {
            warn!(batch = %id, %reason, delete, "confirmed batch is not checked out, ignoring");
            return;
        };

        if delete {
            match BatchFile::from_path(locked_path) {
                Some(file) => {
                    if !self.granted.delete_batch(&file, reason) {
                        warn!(batch = %id, %reason, "confirmed batch could not be deleted");
                    }
                }
                None => warn!(batch = %id, "confirmed batch has no known location"),
            }
        }
        self.locks.release(id);
        debug!(batch = %id, %reason, delete, "batch read confirmed");
    }

    /// Deletes every batch of every consent root, locked or not.
    pub fn drop_all(&self) -> usize {
        let released = self.locks.release_all();
        if !released.is_empty() {
            debug!(feature = %self.feature, released = released.len(), "force-released locked batches");
        }
        let dropped: usize = self.routes.all().iter().map(|route| route.drop_all()).sum();
        info!(feature = %self.feature, dropped, "dropped all batches");
        dropped
    }

    /// Applies a consent change to stored data.
    pub fn on_consent_updated(&self, previous: TrackingConsent, next: TrackingConsent) {
        let _guard = self.write_lock.lock();
        self.routes.migrate(Some(previous), next);
    }

    /// Hands every unlocked granted batch, oldest first, to `handler`.
    /// Batches the handler accepts are deleted. Returns how many were accepted.
    pub fn flush_batches(&self, mut handler: impl FnMut(&BatchData) -> bool) -> usize {
        let mut flushed = 0;
        for file in self.granted.flushable_files() {
            if !self.locks.try_lock(&file) {
                continue;
            }
            let batch = self.load_batch(&file);
            if handler(&batch) {
                self.granted.delete_batch(&file, RemovalReason::Flushed);
                flushed += 1;
            }
            self.locks.release(&file.id);
        }
        debug!(feature = %self.feature, flushed, "flushed batches");
        flushed
    }

    /// Approximate number of granted batches waiting for upload.
    pub fn pending_files_count(&self) -> i64 {
        self.granted.pending_files_count()
    }

    fn load_batch(&self, file: &BatchFile) -> BatchData {
        let events = self.batch_io.read_events(&file.path);
        let metadata_path = file.metadata_path();
        let metadata = file_ops::exists_safe(&metadata_path)
            .then(|| self.metadata_io.read_data(&metadata_path));
        BatchData {
            id: file.id.clone(),
            events,
            metadata,
        }
    }
}
