//! Asynchronous datastore access serialized on a feature queue.

use std::sync::Arc;

use eventspool_storage::{FeatureQueue, StorageContext};
use tracing::debug;

use crate::datastore::{DataStoreFileHandler, DataStoreRead};
use crate::error::DataStoreResult;
use crate::serializer::{DataDeserializer, DataSerializer};

/// Queue-backed handle to a feature datastore.
///
/// Operations run one at a time in submission order, so a read issued after
/// a write observes it.
pub struct DataStoreHandle {
    store: Arc<DataStoreFileHandler>,
    queue: FeatureQueue,
}

impl DataStoreHandle {
    /// Opens the datastore of `feature`. Must be called inside a tokio runtime.
    pub fn open(context: &StorageContext, feature: &str) -> Self {
        let store = Arc::new(DataStoreFileHandler::new(context, feature));
        let queue = FeatureQueue::start(format!("{}/{}/datastore", context.instance_name, feature));
        debug!(feature, dir = %store.dir().display(), "datastore opened");
        Self { store, queue }
    }

    /// Underlying synchronous handler.
    pub fn store(&self) -> &DataStoreFileHandler {
        &self.store
    }

    /// Writes `value` under `key`.
    pub async fn set_value<T, S>(
        &self,
        key: impl Into<String>,
        value: T,
        serializer: S,
        version: u32,
    ) -> DataStoreResult<bool>
    where
        T: Send + 'static,
        S: DataSerializer<T> + 'static,
    {
        let store = self.store.clone();
        let key = key.into();
        let written = self
            .queue
            .run_job(move || store.write(&key, &value, &serializer, version))
            .await?;
        Ok(written)
    }

    /// Reads the record under `key`.
    pub async fn value<T, D>(
        &self,
        key: impl Into<String>,
        deserializer: D,
        version: u32,
    ) -> DataStoreResult<DataStoreRead<T>>
    where
        T: Send + 'static,
        D: DataDeserializer<T> + 'static,
    {
        let store = self.store.clone();
        let key = key.into();
        let read = self
            .queue
            .run_job(move || store.read(&key, &deserializer, version))
            .await?;
        Ok(read)
    }

    /// Deletes the record under `key`.
    pub async fn remove_value(&self, key: impl Into<String>) -> DataStoreResult<bool> {
        let store = self.store.clone();
        let key = key.into();
        Ok(self.queue.run_job(move || store.remove(&key)).await?)
    }

    /// Finishes queued operations and stops the queue.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DataStoreError;
    use crate::serializer::JsonSerde;
    use eventspool_storage::{ManualClock, StorageError};
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct ViewState {
        name: String,
        visits: u32,
    }

    fn context(dir: &std::path::Path) -> StorageContext {
        StorageContext::new(dir, "main").with_clock(Arc::new(ManualClock::new(1_700_000_000_000)))
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let dir = tempdir().unwrap();
        let handle = DataStoreHandle::open(&context(dir.path()), "rum");
        let state = ViewState {
            name: "checkout".to_string(),
            visits: 3,
        };
        assert!(handle.set_value("view", state.clone(), JsonSerde, 1).await.unwrap());

        let read: DataStoreRead<ViewState> = handle.value("view", JsonSerde, 1).await.unwrap();
        assert_eq!(read.into_value(), Some(state));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_value() {
        let dir = tempdir().unwrap();
        let handle = DataStoreHandle::open(&context(dir.path()), "rum");
        handle.set_value("k", 5u32, JsonSerde, 1).await.unwrap();
        assert!(handle.remove_value("k").await.unwrap());

        let read: DataStoreRead<u32> = handle.value("k", JsonSerde, 1).await.unwrap();
        assert_eq!(read, DataStoreRead::NoData);
    }

    #[tokio::test]
    async fn test_operations_after_shutdown_fail() {
        let dir = tempdir().unwrap();
        let handle = DataStoreHandle::open(&context(dir.path()), "logs");
        handle.shutdown().await;

        let err = handle.remove_value("k").await.unwrap_err();
        assert!(matches!(
            err,
            DataStoreError::Storage(StorageError::QueueClosed { .. })
        ));
    }

    #[tokio::test]
    async fn test_writes_apply_in_order() {
        let dir = tempdir().unwrap();
        let handle = DataStoreHandle::open(&context(dir.path()), "rum");
        for i in 0..10u32 {
            handle.set_value("counter", i, JsonSerde, 1).await.unwrap();
        }
        let read: DataStoreRead<u32> = handle.value("counter", JsonSerde, 1).await.unwrap();
        assert_eq!(read.into_value(), Some(9));
    }
}
