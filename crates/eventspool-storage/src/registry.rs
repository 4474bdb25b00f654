//! Per-instance registry of feature storages.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::batch_codec::RawBatchEvent;
use crate::config::StorageContext;
use crate::consent::TrackingConsent;
use crate::error::StorageResult;
use crate::handle::FeatureStorageHandle;
use crate::writer::EventType;

/// Lazily opens one [`FeatureStorageHandle`] per feature and keeps them in
/// step with the current tracking consent.
pub struct StorageRegistry {
    context: StorageContext,
    consent: RwLock<TrackingConsent>,
    features: DashMap<String, Arc<FeatureStorageHandle>>,
    opening: tokio::sync::Mutex<()>,
}

impl StorageRegistry {
    /// Registry for the instance described by `context`.
    pub fn new(context: StorageContext, consent: TrackingConsent) -> Self {
        info!(instance = %context.instance_name, %consent, "storage registry created");
        Self {
            context,
            consent: RwLock::new(consent),
            features: DashMap::new(),
            opening: tokio::sync::Mutex::new(()),
        }
    }

    /// Current tracking consent.
    pub fn consent(&self) -> TrackingConsent {
        *self.consent.read()
    }

    /// Storage of `feature`, opened on first use.
    pub async fn feature(&self, feature: &str) -> StorageResult<Arc<FeatureStorageHandle>> {
        if let Some(handle) = self.features.get(feature) {
            return Ok(handle.clone());
        }
        // Opening wipes pending data, so it must happen once per feature.
        let _opening = self.opening.lock().await;
        if let Some(handle) = self.features.get(feature) {
            return Ok(handle.clone());
        }
        let handle = Arc::new(FeatureStorageHandle::open(&self.context, feature).await?);
        self.features.insert(feature.to_string(), handle.clone());
        debug!(feature, "feature storage registered");
        Ok(handle)
    }

    /// Names of the opened features, sorted.
    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.features.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Writes one event to `feature` under the current consent.
    pub async fn write_event(
        &self,
        feature: &str,
        event: RawBatchEvent,
        batch_metadata: Option<Vec<u8>>,
        event_type: EventType,
    ) -> StorageResult<bool> {
        let handle = self.feature(feature).await?;
        handle
            .write_event(self.consent(), event, batch_metadata, event_type)
            .await
    }

    /// Switches consent and migrates the data of every opened feature.
    pub async fn set_consent(&self, next: TrackingConsent) -> StorageResult<()> {
        let previous = std::mem::replace(&mut *self.consent.write(), next);
        if previous == next {
            return Ok(());
        }
        info!(%previous, %next, "tracking consent updated");
        for handle in self.handles() {
            handle.on_consent_updated(previous, next).await?;
        }
        Ok(())
    }

    /// Drops the data of every opened feature.
    pub async fn drop_all(&self) -> StorageResult<usize> {
        let mut dropped = 0;
        for handle in self.handles() {
            dropped += handle.drop_all().await?;
        }
        Ok(dropped)
    }

    /// Drains every feature queue. Later calls on the handles fail with `QueueClosed`.
    pub async fn shutdown(&self) {
        for handle in self.handles() {
            handle.shutdown().await;
        }
        if self.features.is_empty() {
            warn!(instance = %self.context.instance_name, "shutdown of a registry without features");
        }
    }

    // Cloned out so no map guard is held across an await.
    fn handles(&self) -> Vec<Arc<FeatureStorageHandle>> {
        self.features.iter().map(|e| e.value().clone()).collect()
    }
}
