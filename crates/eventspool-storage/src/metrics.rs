//! Batch lifecycle metrics.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Why a batch file left the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemovalReason {
    /// The intake answered with this HTTP status.
    IntakeCode(u16),
    /// The batch could not be decoded.
    Invalid,
    /// Evicted to bring the root back under its disk quota.
    Purged,
    /// Older than the configured age limit.
    Obsolete,
    /// Flushed or dropped on request.
    Flushed,
}

impl RemovalReason {
    /// Whether the metric for this removal is worth sending.
    pub fn include_in_metrics(&self) -> bool {
        !matches!(self, RemovalReason::Flushed)
    }
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalReason::IntakeCode(code) => write!(f, "intake-code-{}", code),
            RemovalReason::Invalid => write!(f, "invalid"),
            RemovalReason::Purged => write!(f, "purged"),
            RemovalReason::Obsolete => write!(f, "obsolete"),
            RemovalReason::Flushed => write!(f, "flushed"),
        }
    }
}

/// Facts about a batch file at the moment the orchestrator stops writing to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchClosedMetadata {
    /// Last time an event was routed to the file.
    pub last_time_used_ms: u64,
    /// Number of events routed to the file.
    pub events_count: u64,
    /// Whether the roll was requested by the caller.
    pub forced_new: bool,
}

/// Receives batch lifecycle events.
pub trait MetricsDispatcher: Send + Sync {
    /// A batch file was deleted.
    fn batch_deleted(&self, batch_file: &Path, reason: RemovalReason, pending_batches: i64);
    /// The orchestrator rolled away from a batch file.
    fn batch_closed(&self, batch_file: &Path, metadata: BatchClosedMetadata);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetricsDispatcher;

impl MetricsDispatcher for NoOpMetricsDispatcher {
    fn batch_deleted(&self, _batch_file: &Path, _reason: RemovalReason, _pending_batches: i64) {}
    fn batch_closed(&self, _batch_file: &Path, _metadata: BatchClosedMetadata) {}
}

/// Type of metric for Prometheus compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricType {
    /// Monotonically increasing value
    Counter,
    /// Value that can go up or down
    Gauge,
}

/// Value of a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    /// Counter value (u64)
    Counter(u64),
    /// Gauge value (f64)
    Gauge(f64),
}

/// A single metric with metadata and value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    /// Metric name
    pub name: String,
    /// Help text
    pub help: String,
    /// Type of metric
    pub metric_type: MetricType,
    /// Current value
    pub value: MetricValue,
    /// Label key-value pairs
    pub labels: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Counters {
    deleted_by_reason: HashMap<String, u64>,
    batches_closed: u64,
    events_in_closed_batches: u64,
    forced_rolls: u64,
    pending_batches: i64,
}

/// In-memory recorder that doubles as a [`MetricsDispatcher`].
#[derive(Debug, Default)]
pub struct StorageMetrics {
    counters: Mutex<Counters>,
}

impl StorageMetrics {
    /// Create a new StorageMetrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of deletions recorded for `reason`.
    pub fn deleted_count(&self, reason: RemovalReason) -> u64 {
        self.counters
            .lock()
            .deleted_by_reason
            .get(&reason.to_string())
            .copied()
            .unwrap_or(0)
    }

    /// Number of batches closed so far.
    pub fn closed_count(&self) -> u64 {
        self.counters.lock().batches_closed
    }

    /// Export all metrics in Prometheus format.
    pub fn export(&self) -> Vec<Metric> {
        let counters = self.counters.lock();
        let mut metrics = Vec::new();

        let mut reasons: Vec<_> = counters.deleted_by_reason.iter().collect();
        reasons.sort();
        for (reason, count) in reasons {
            metrics.push(Metric {
                name: "eventspool_batches_deleted_total".to_string(),
                help: "Total number of batch files deleted".to_string(),
                metric_type: MetricType::Counter,
                value: MetricValue::Counter(*count),
                labels: vec![("reason".to_string(), reason.clone())],
            });
        }

        metrics.push(Metric {
            name: "eventspool_batches_closed_total".to_string(),
            help: "Total number of batch files closed for writing".to_string(),
            metric_type: MetricType::Counter,
            value: MetricValue::Counter(counters.batches_closed),
            labels: vec![],
        });
        metrics.push(Metric {
            name: "eventspool_batches_forced_roll_total".to_string(),
            help: "Batch files closed because a new batch was requested".to_string(),
            metric_type: MetricType::Counter,
            value: MetricValue::Counter(counters.forced_rolls),
            labels: vec![],
        });

        let avg_events = if counters.batches_closed == 0 {
            0.0
        } else {
            counters.events_in_closed_batches as f64 / counters.batches_closed as f64
        };
        metrics.push(Metric {
            name: "eventspool_events_per_batch".to_string(),
            help: "Average number of events in closed batch files".to_string(),
            metric_type: MetricType::Gauge,
            value: MetricValue::Gauge(avg_events),
            labels: vec![],
        });
        metrics.push(Metric {
            name: "eventspool_pending_batches".to_string(),
            help: "Approximate number of batch files waiting for upload".to_string(),
            metric_type: MetricType::Gauge,
            value: MetricValue::Gauge(counters.pending_batches as f64),
            labels: vec![],
        });

        metrics
    }
}

impl MetricsDispatcher for StorageMetrics {
    fn batch_deleted(&self, batch_file: &Path, reason: RemovalReason, pending_batches: i64) {
        let mut counters = self.counters.lock();
        counters.pending_batches = pending_batches;
        if !reason.include_in_metrics() {
            return;
        }
        *counters
            .deleted_by_reason
            .entry(reason.to_string())
            .or_insert(0) += 1;
        debug!(path = %batch_file.display(), %reason, pending_batches, "recorded batch deletion");
    }

    fn batch_closed(&self, batch_file: &Path, metadata: BatchClosedMetadata) {
        let mut counters = self.counters.lock();
        counters.batches_closed += 1;
        counters.events_in_closed_batches += metadata.events_count;
        if metadata.forced_new {
            counters.forced_rolls += 1;
        }
        debug!(
            path = %batch_file.display(),
            events = metadata.events_count,
            "recorded batch close"
        );
    }
}
