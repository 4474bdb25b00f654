//! Persistence configuration and the storage context handed to every component.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::encryption::Encryption;
use crate::error::{StorageError, StorageResult};
use crate::metrics::{MetricsDispatcher, NoOpMetricsDispatcher};
use crate::time::{SystemTimeProvider, TimeProvider};

const WRITE_WINDOW_PERCENT: u64 = 95;
const READ_WINDOW_PERCENT: u64 = 105;

/// Limits applied to the batch files of one orchestrator root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilePersistenceConfig {
    /// Maximum size of one batch file in bytes (default 4 MiB).
    pub max_batch_size: u64,
    /// Maximum number of events per batch file (default 500).
    pub max_items_per_batch: u64,
    /// Maximum size of one event in bytes (default 512 KiB).
    pub max_item_size: u64,
    /// Age after which a batch file is deleted as obsolete (default 18h).
    pub old_file_threshold_ms: u64,
    /// Maximum bytes under one orchestrator root (default 512 MiB).
    pub max_disk_space: u64,
    /// Window during which a batch file is considered "recent" (default 5s).
    pub recent_delay_ms: u64,
    /// Minimum time between two cleanup passes (default 5s).
    pub cleanup_frequency_threshold_ms: u64,
}

impl Default for FilePersistenceConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 4 * 1024 * 1024,
            max_items_per_batch: 500,
            max_item_size: 512 * 1024,
            old_file_threshold_ms: 18 * 60 * 60 * 1000,
            max_disk_space: 512 * 1024 * 1024,
            recent_delay_ms: 5_000,
            cleanup_frequency_threshold_ms: 5_000,
        }
    }
}

impl FilePersistenceConfig {
    /// Loads a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> StorageResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| StorageError::from_io(path, e))?;
        let config: FilePersistenceConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that limits are non-zero and mutually consistent.
    pub fn validate(&self) -> StorageResult<()> {
        if self.max_batch_size == 0 || self.max_items_per_batch == 0 || self.max_item_size == 0 {
            return Err(StorageError::InvalidConfig(
                "batch and item limits must be non-zero".to_string(),
            ));
        }
        if self.max_item_size > self.max_batch_size {
            return Err(StorageError::InvalidConfig(format!(
                "max_item_size ({}) exceeds max_batch_size ({})",
                self.max_item_size, self.max_batch_size
            )));
        }
        if self.max_disk_space < self.max_batch_size {
            return Err(StorageError::InvalidConfig(format!(
                "max_disk_space ({}) is smaller than max_batch_size ({})",
                self.max_disk_space, self.max_batch_size
            )));
        }
        Ok(())
    }

    /// Age under which the last batch file may still be reused for writes.
    pub fn recent_write_delay_ms(&self) -> u64 {
        self.recent_delay_ms * WRITE_WINDOW_PERCENT / 100
    }

    /// Age a batch file must exceed before it may be handed to a reader.
    pub fn recent_read_delay_ms(&self) -> u64 {
        self.recent_delay_ms * READ_WINDOW_PERCENT / 100
    }
}

/// Explicit context shared by the components of one SDK instance.
#[derive(Clone)]
pub struct StorageContext {
    /// Directory under which every instance lays out its features.
    pub storage_dir: PathBuf,
    /// Name of the SDK instance owning this storage.
    pub instance_name: String,
    /// Batch file limits.
    pub persistence: FilePersistenceConfig,
    /// Device clock.
    pub clock: Arc<dyn TimeProvider>,
    /// Sink for batch lifecycle metrics.
    pub metrics: Arc<dyn MetricsDispatcher>,
    /// Optional encryption applied to everything written to disk.
    pub encryption: Option<Arc<dyn Encryption>>,
}

impl StorageContext {
    /// Context with the default config, the system clock and no metrics or encryption.
    pub fn new(storage_dir: impl Into<PathBuf>, instance_name: impl Into<String>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            instance_name: instance_name.into(),
            persistence: FilePersistenceConfig::default(),
            clock: Arc::new(SystemTimeProvider),
            metrics: Arc::new(NoOpMetricsDispatcher),
            encryption: None,
        }
    }

    /// Replaces the persistence config.
    pub fn with_persistence(mut self, persistence: FilePersistenceConfig) -> Self {
        self.persistence = persistence;
        self
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsDispatcher>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Enables encryption.
    pub fn with_encryption(mut self, encryption: Arc<dyn Encryption>) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// `<storage_dir>/<instance>/<feature>`
    pub fn feature_dir(&self, feature: &str) -> PathBuf {
        self.storage_dir.join(&self.instance_name).join(feature)
    }
}

impl fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageContext")
            .field("storage_dir", &self.storage_dir)
            .field("instance_name", &self.instance_name)
            .field("persistence", &self.persistence)
            .field("encrypted", &self.encryption.is_some())
            .finish()
    }
}
