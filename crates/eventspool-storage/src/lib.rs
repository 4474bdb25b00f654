#![warn(missing_docs)]

//! eventspool storage: consent-gated batch files for telemetry events
//!
//! Write path: Event → Consent route → Orchestrator (pick/roll file) → Codec (append) → Disk
//! Read path:  Orchestrator (oldest unlocked) → Lock registry → Codec (decode) → Uploader → Confirm

pub mod batch;
pub mod batch_codec;
pub mod config;
pub mod consent;
pub mod encryption;
pub mod error;
pub mod file_ops;
pub mod handle;
pub mod lock_registry;
pub mod metrics;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod storage;
pub mod time;
pub mod writer;

pub use batch::{BatchData, BatchFile, BatchId};
pub use batch_codec::{
    BatchFileReaderWriter, FileReaderWriter, PlainBatchFileReaderWriter, PlainFileReaderWriter,
    RawBatchEvent,
};
pub use config::{FilePersistenceConfig, StorageContext};
pub use consent::{ConsentRoute, ConsentRoutes, TrackingConsent};
pub use encryption::{
    derive_feature_key, AeadEncryption, Encryption, EncryptionAlgorithm, EncryptionKey,
};
pub use error::{StorageError, StorageResult};
pub use handle::FeatureStorageHandle;
pub use lock_registry::LockedBatches;
pub use metrics::{
    BatchClosedMetadata, Metric, MetricType, MetricValue, MetricsDispatcher,
    NoOpMetricsDispatcher, RemovalReason, StorageMetrics,
};
pub use orchestrator::BatchFileOrchestrator;
pub use queue::FeatureQueue;
pub use registry::StorageRegistry;
pub use storage::ConsentAwareStorage;
pub use time::{ManualClock, SystemTimeProvider, TimeProvider};
pub use writer::{EventBatchWriter, EventType, FileEventBatchWriter, NoOpEventBatchWriter};
