use std::sync::Arc;

use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use ascend_shared::{CoordResult, EntityId, EntityStatus, Snapshot, SnapshotStore};

use crate::config::ThresholdConfig;
use crate::coordinator::{is_critical, EvolutionState};

/// How far back the rollback scan looks. Retention usually prunes long before
/// this bound, but a cycle must never stall on an unbounded history read.
const ROLLBACK_SCAN_LIMIT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// State restored from a historically gate-passing snapshot.
    Restored,
    /// Degraded without rollback; the caller may retry.
    StillDegraded,
    /// Terminal: requires explicit deregister + register to clear.
    Quarantined,
}

impl std::fmt::Display for RecoveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Restored => write!(f, "Restored"),
            Self::StillDegraded => write!(f, "StillDegraded"),
            Self::Quarantined => write!(f, "Quarantined"),
        }
    }
}

/// Restores sustained-degraded entities to their last known-good snapshot, or
/// quarantines them when no such snapshot exists.
pub struct RecoveryController {
    store: Arc<dyn SnapshotStore>,
    thresholds: ThresholdConfig,
}

impl RecoveryController {
    #[must_use]
    pub fn new(store: Arc<dyn SnapshotStore>, thresholds: ThresholdConfig) -> Self {
        Self { store, thresholds }
    }

    /// Invoked by the coordinator inside the entity's locked cycle after a
    /// gate failure. `measured_health` is the failing measurement;
    /// `failures` is the consecutive failed-cycle count including this one.
    ///
    /// Never fabricates a score: restored values always come from a snapshot
    /// that passed the gate when it was recorded.
    pub async fn attempt_recovery(
        &self,
        state: &mut EvolutionState,
        measured_health: f64,
        failures: u32,
    ) -> CoordResult<RecoveryOutcome> {
        let entity_id = state.entity_id;

        if failures > self.thresholds.max_retries {
            warn!(
                entity_id = %entity_id,
                failures,
                max_retries = self.thresholds.max_retries,
                "🛑 Retry budget exhausted; quarantining entity"
            );
            state.status = EntityStatus::Quarantined;
            return Ok(RecoveryOutcome::Quarantined);
        }

        if !is_critical(measured_health, &self.thresholds) {
            // Sub-floor but not critical: degrade and let the caller retry.
            state.status = EntityStatus::Degraded;
            return Ok(RecoveryOutcome::StillDegraded);
        }

        match self.last_good_snapshot(entity_id).await? {
            Some(snapshot) => {
                info!(
                    entity_id = %entity_id,
                    snapshot_id = snapshot.id,
                    level = %snapshot.level,
                    "🔄 Rolling back to last known-good snapshot"
                );
                state.level = snapshot.level;
                state.health_score = snapshot.health_score;
                state.stability_score = snapshot.stability_score;
                state.progress = 0.0;
                state.last_snapshot_id = Some(snapshot.id);
                state.status = EntityStatus::Degraded;
                Ok(RecoveryOutcome::Restored)
            }
            None => {
                error!(
                    entity_id = %entity_id,
                    "No gate-passing snapshot available for rollback; quarantining entity"
                );
                state.status = EntityStatus::Quarantined;
                Ok(RecoveryOutcome::Quarantined)
            }
        }
    }

    /// Newest snapshot that passed both gate floors when recorded, scanning
    /// newest-first.
    async fn last_good_snapshot(&self, entity_id: EntityId) -> CoordResult<Option<Snapshot>> {
        let mut history = self.store.history(entity_id, ROLLBACK_SCAN_LIMIT);
        while let Some(snapshot) = history.next().await {
            let snapshot = snapshot?;
            if snapshot.health_score >= self.thresholds.min_health
                && snapshot.stability_score >= self.thresholds.min_stability
            {
                return Ok(Some(snapshot));
            }
        }
        Ok(None)
    }
}
