//! Tracking consent and the per-consent storage routes.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::metrics::RemovalReason;
use crate::orchestrator::BatchFileOrchestrator;

/// Directory of the uploadable root inside a feature directory.
pub const GRANTED_DIR: &str = "granted";

/// Directory of the pending root inside a feature directory.
pub const PENDING_DIR: &str = "pending";

/// Privacy permission level gating what happens to written events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingConsent {
    /// Events are stored and uploaded.
    Granted,
    /// Events are stored aside until the user decides.
    Pending,
    /// Events are dropped.
    NotGranted,
}

impl fmt::Display for TrackingConsent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingConsent::Granted => write!(f, "granted"),
            TrackingConsent::Pending => write!(f, "pending"),
            TrackingConsent::NotGranted => write!(f, "not_granted"),
        }
    }
}

/// What a consent state does with writes, reads, drops and migrations.
pub trait ConsentRoute: Send + Sync {
    /// Consent this route serves.
    fn consent(&self) -> TrackingConsent;

    /// Orchestrator receiving writes, `None` if writes are discarded.
    fn write_target(&self) -> Option<&Arc<BatchFileOrchestrator>>;

    /// Orchestrator batches are uploaded from, `None` if nothing is readable.
    fn read_source(&self) -> Option<&Arc<BatchFileOrchestrator>>;

    /// Deletes everything this route stores. Returns the number of batches removed.
    fn drop_all(&self) -> usize;

    /// Hands stored data over to `next`. Returns the number of batches affected.
    fn migrate_to(&self, next: &dyn ConsentRoute) -> usize;
}

/// Uploadable storage.
pub struct GrantedRoute {
    orchestrator: Arc<BatchFileOrchestrator>,
}

impl ConsentRoute for GrantedRoute {
    fn consent(&self) -> TrackingConsent {
        TrackingConsent::Granted
    }

    fn write_target(&self) -> Option<&Arc<BatchFileOrchestrator>> {
        Some(&self.orchestrator)
    }

    fn read_source(&self) -> Option<&Arc<BatchFileOrchestrator>> {
        Some(&self.orchestrator)
    }

    fn drop_all(&self) -> usize {
        self.orchestrator.delete_all_files(RemovalReason::Flushed)
    }

    // Granted data is never moved or deleted by a consent change.
    fn migrate_to(&self, _next: &dyn ConsentRoute) -> usize {
        0
    }
}

/// Write-only holding area. Never read piecemeal.
pub struct PendingRoute {
    orchestrator: Arc<BatchFileOrchestrator>,
}

impl ConsentRoute for PendingRoute {
    fn consent(&self) -> TrackingConsent {
        TrackingConsent::Pending
    }

    fn write_target(&self) -> Option<&Arc<BatchFileOrchestrator>> {
        Some(&self.orchestrator)
    }

    fn read_source(&self) -> Option<&Arc<BatchFileOrchestrator>> {
        None
    }

    fn drop_all(&self) -> usize {
        self.orchestrator.delete_all_files(RemovalReason::Flushed)
    }

    fn migrate_to(&self, next: &dyn ConsentRoute) -> usize {
        match next.consent() {
            TrackingConsent::Pending => 0,
            TrackingConsent::NotGranted => self.drop_all(),
            TrackingConsent::Granted => {
                let Some(target) = next.write_target() else {
                    return 0;
                };
                let mut moved = 0;
                for file in self.orchestrator.all_files() {
                    if target.import_batch(&file).is_some() {
                        self.orchestrator.on_file_deleted(&file);
                        moved += 1;
                    } else {
                        warn!(batch = %file.id, "pending batch could not be moved to granted storage");
                    }
                }
                moved
            }
        }
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NotGrantedRoute;

impl ConsentRoute for NotGrantedRoute {
    fn consent(&self) -> TrackingConsent {
        TrackingConsent::NotGranted
    }

    fn write_target(&self) -> Option<&Arc<BatchFileOrchestrator>> {
        None
    }

    fn read_source(&self) -> Option<&Arc<BatchFileOrchestrator>> {
        None
    }

    fn drop_all(&self) -> usize {
        0
    }

    fn migrate_to(&self, _next: &dyn ConsentRoute) -> usize {
        0
    }
}

/// Route table keyed by consent.
pub struct ConsentRoutes {
    granted: GrantedRoute,
    pending: PendingRoute,
    not_granted: NotGrantedRoute,
}

impl ConsentRoutes {
    /// Table over the granted and pending roots of one feature.
    pub fn new(
        granted: Arc<BatchFileOrchestrator>,
        pending: Arc<BatchFileOrchestrator>,
    ) -> Self {
        Self {
            granted: GrantedRoute {
                orchestrator: granted,
            },
            pending: PendingRoute {
                orchestrator: pending,
            },
            not_granted: NotGrantedRoute,
        }
    }

    /// Route for `consent`.
    pub fn route(&self, consent: TrackingConsent) -> &dyn ConsentRoute {
        match consent {
            TrackingConsent::Granted => &self.granted,
            TrackingConsent::Pending => &self.pending,
            TrackingConsent::NotGranted => &self.not_granted,
        }
    }

    /// Every route, granted first.
    pub fn all(&self) -> [&dyn ConsentRoute; 3] {
        [&self.granted, &self.pending, &self.not_granted]
    }

    /// Applies a consent change. `previous == None` is the initial migration at
    /// startup, which wipes pending data left by an earlier process.
    pub fn migrate(&self, previous: Option<TrackingConsent>, next: TrackingConsent) -> usize {
        match previous {
            None => {
                let wiped = self.pending.drop_all();
                if wiped > 0 {
                    info!(wiped, "discarded pending batches of a previous process");
                }
                wiped
            }
            Some(previous) => {
                let affected = self.route(previous).migrate_to(self.route(next));
                debug!(%previous, %next, affected, "consent migration applied");
                affected
            }
        }
    }
}
