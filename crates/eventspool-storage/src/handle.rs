//! Async facade over one feature's storage.

use std::sync::Arc;

use tracing::debug;

use crate::batch::{BatchData, BatchId};
use crate::batch_codec::RawBatchEvent;
use crate::config::StorageContext;
use crate::consent::TrackingConsent;
use crate::error::StorageResult;
use crate::metrics::RemovalReason;
use crate::queue::FeatureQueue;
use crate::storage::ConsentAwareStorage;
use crate::writer::{EventBatchWriter, EventType};

/// Storage of one feature, driven through its own task queue.
///
/// Writes, reads, drops and consent migrations run strictly in the order
/// they were requested, so a consent update observes every earlier write.
pub struct FeatureStorageHandle {
    storage: Arc<ConsentAwareStorage>,
    queue: FeatureQueue,
}

impl FeatureStorageHandle {
    /// Opens storage for `feature`. The startup wipe of pending data runs on the new queue.
    pub async fn open(context: &StorageContext, feature: &str) -> StorageResult<Self> {
        let queue = FeatureQueue::start(format!("{}/{}", context.instance_name, feature));
        let context = context.clone();
        let name = feature.to_string();
        let storage = queue
            .run_job(move || ConsentAwareStorage::new(&context, &name))
            .await?;
        Ok(Self {
            storage: Arc::new(storage),
            queue,
        })
    }

    /// Feature name.
    pub fn feature(&self) -> &str {
        self.storage.feature()
    }

    /// Runs `action` with a writer selected for `consent`, on the feature queue.
    pub async fn write_current_batch<F, R>(
        &self,
        consent: TrackingConsent,
        force_new_batch: bool,
        action: F,
    ) -> StorageResult<R>
    where
        F: FnOnce(&dyn EventBatchWriter) -> R + Send + 'static,
        R: Send + 'static,
    {
        let storage = self.storage.clone();
        self.queue
            .run_job(move || storage.write_current_batch(consent, force_new_batch, action))
            .await
    }

    /// Writes a single event.
    pub async fn write_event(
        &self,
        consent: TrackingConsent,
        event: RawBatchEvent,
        batch_metadata: Option<Vec<u8>>,
        event_type: EventType,
    ) -> StorageResult<bool> {
        self.write_current_batch(consent, false, move |writer| {
            writer.write(&event, batch_metadata.as_deref(), event_type)
        })
        .await
    }

    /// Locks and returns the next uploadable batch.
    pub async fn read_next_batch(&self) -> StorageResult<Option<BatchData>> {
        let storage = self.storage.clone();
        self.queue.run_job(move || storage.read_next_batch()).await
    }

    /// Releases (and optionally deletes) a batch returned by `read_next_batch`.
    pub async fn confirm_batch_read(
        &self,
        id: BatchId,
        reason: RemovalReason,
        delete: bool,
    ) -> StorageResult<()> {
        let storage = self.storage.clone();
        self.queue
            .run_job(move || storage.confirm_batch_read(&id, reason, delete))
            .await
    }

    /// Deletes every batch of the feature, locked ones included.
    pub async fn drop_all(&self) -> StorageResult<usize> {
        let storage = self.storage.clone();
        self.queue.run_job(move || storage.drop_all()).await
    }

    /// Migrates stored data after a consent change.
    pub async fn on_consent_updated(
        &self,
        previous: TrackingConsent,
        next: TrackingConsent,
    ) -> StorageResult<()> {
        let storage = self.storage.clone();
        self.queue
            .run_job(move || storage.on_consent_updated(previous, next))
            .await
    }

    /// Drains uploadable batches through `handler`, deleting the accepted ones.
    pub async fn flush_batches<F>(&self, handler: F) -> StorageResult<usize>
    where
        F: FnMut(&BatchData) -> bool + Send + 'static,
    {
        let storage = self.storage.clone();
        self.queue
            .run_job(move || storage.flush_batches(handler))
            .await
    }

    /// Approximate number of batches waiting for upload.
    pub fn pending_files_count(&self) -> i64 {
        self.storage.pending_files_count()
    }

    /// Finishes queued work and stops the queue.
    pub async fn shutdown(&self) {
        debug!(feature = %self.feature(), "shutting down feature storage");
        self.queue.shutdown().await;
    }
}
