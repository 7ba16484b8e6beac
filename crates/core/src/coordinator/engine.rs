use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{timeout, Duration};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use ascend_shared::{
    CoordError, CoordResult, EntityId, EntityStatus, SnapshotDraft, SnapshotStore,
};

use crate::alerts::AlertManager;
use crate::config::ThresholdConfig;
use crate::metrics::{advance_rate, CoordinatorMetrics};
use crate::recovery::{RecoveryController, RecoveryOutcome};

use super::health::{self, HealthVerdict};
use super::types::{EvolutionState, MetricsSnapshot, Scorer};

/// How much history the metrics projection reads.
const METRICS_SCAN_LIMIT: usize = 256;

struct CycleState {
    consecutive_failures: u32,
    last_verdict: HealthVerdict,
}

/// Per-entity bookkeeping. The committed state is only written at commit
/// points, so concurrent `status` reads never observe a half-applied cycle.
struct EntityRecord {
    state: RwLock<EvolutionState>,
    /// Exclusive cycle lock, plus the bookkeeping only cycles touch.
    cycle: Mutex<CycleState>,
}

/// Orchestrates evolution cycles: one in flight per entity, enforced by a
/// per-entity lock (never a global one). A contended `evolve` fails fast with
/// `Busy` instead of queueing, so callers retry on their own schedule.
pub struct EvolutionCoordinator {
    entities: DashMap<EntityId, Arc<EntityRecord>>,
    store: Arc<dyn SnapshotStore>,
    alerts: Arc<AlertManager>,
    recovery: RecoveryController,
    scorer: Arc<dyn Scorer>,
    thresholds: ThresholdConfig,
    progress_step: f64,
    metrics: Arc<CoordinatorMetrics>,
}

impl EvolutionCoordinator {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        alerts: Arc<AlertManager>,
        scorer: Arc<dyn Scorer>,
        thresholds: ThresholdConfig,
        progress_step: f64,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Self {
        let step = progress_step.min(thresholds.max_evolution_rate);
        if step < progress_step {
            warn!(
                progress_step,
                max_evolution_rate = thresholds.max_evolution_rate,
                "progress_step exceeds max_evolution_rate; clamping"
            );
        }
        Self {
            entities: DashMap::new(),
            recovery: RecoveryController::new(store.clone(), thresholds.clone()),
            store,
            alerts,
            scorer,
            thresholds,
            progress_step: step,
            metrics,
        }
    }

    /// Creates the initial state for a new entity. Not idempotent: a second
    /// registration for the same id fails.
    pub fn register(&self, entity_id: EntityId) -> CoordResult<()> {
        match self.entities.entry(entity_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(CoordError::AlreadyExists(entity_id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(EntityRecord {
                    state: RwLock::new(EvolutionState::initial(entity_id)),
                    cycle: Mutex::new(CycleState {
                        consecutive_failures: 0,
                        last_verdict: HealthVerdict::Pass,
                    }),
                }));
                info!(entity_id = %entity_id, "Entity registered");
                Ok(())
            }
        }
    }

    /// Removes the live state. Snapshot history survives per the store's
    /// retention policy, independent of the live state's destruction.
    pub fn deregister(&self, entity_id: EntityId) -> CoordResult<()> {
        match self.entities.remove(&entity_id) {
            Some(_) => {
                info!(entity_id = %entity_id, "Entity deregistered");
                Ok(())
            }
            None => Err(CoordError::NotFound(entity_id)),
        }
    }

    /// Last committed state, readable concurrently with an in-flight cycle.
    pub async fn status(&self, entity_id: EntityId) -> Option<EvolutionState> {
        let record = Arc::clone(self.entities.get(&entity_id)?.value());
        let state = record.state.read().await.clone();
        Some(state)
    }

    /// Runs one evolution cycle. Fails immediately with `Busy` if a cycle is
    /// already in flight for this entity.
    pub async fn evolve(&self, entity_id: EntityId) -> CoordResult<EvolutionState> {
        let record = self.record(entity_id)?;
        let Ok(mut cycle) = record.cycle.try_lock() else {
            return Err(CoordError::Busy(entity_id));
        };
        self.run_cycle(entity_id, &record, &mut cycle).await
    }

    /// Like `evolve`, but waits up to `wait` for the cycle lock. The timeout
    /// bounds lock acquisition only; once acquired, the cycle runs to
    /// completion.
    pub async fn evolve_with_timeout(
        &self,
        entity_id: EntityId,
        wait: Duration,
    ) -> CoordResult<EvolutionState> {
        let record = self.record(entity_id)?;
        let Ok(mut cycle) = timeout(wait, record.cycle.lock()).await else {
            return Err(CoordError::Busy(entity_id));
        };
        self.run_cycle(entity_id, &record, &mut cycle).await
    }

    fn record(&self, entity_id: EntityId) -> CoordResult<Arc<EntityRecord>> {
        // Clone the Arc out so the map shard guard is not held across awaits.
        self.entities
            .get(&entity_id)
            .map(|r| Arc::clone(r.value()))
            .ok_or(CoordError::NotFound(entity_id))
    }

    async fn run_cycle(
        &self,
        entity_id: EntityId,
        record: &EntityRecord,
        cycle: &mut CycleState,
    ) -> CoordResult<EvolutionState> {
        self.metrics.cycles_total.fetch_add(1, Ordering::Relaxed);

        let current = record.state.read().await.clone();
        if current.status == EntityStatus::Quarantined {
            return Err(CoordError::Quarantined(entity_id));
        }

        // Measure once per cycle; the gate sees current conditions.
        let (health, stability) = self.scorer.score(&current);
        let health = clamp_score(health);
        let stability = clamp_score(stability);

        let mut candidate = current;
        candidate.health_score = health;
        candidate.stability_score = stability;

        let verdict = health::evaluate(&candidate, &self.thresholds);
        let previous_verdict = cycle.last_verdict.clone();

        if let HealthVerdict::Fail(reason) = &verdict {
            cycle.consecutive_failures += 1;
            self.metrics.cycles_failed.fetch_add(1, Ordering::Relaxed);
            debug!(
                entity_id = %entity_id,
                %reason,
                failures = cycle.consecutive_failures,
                "Health gate rejected cycle"
            );

            // Failing measurements are never committed; recovery mutates the
            // committed state only through snapshot replay or status changes.
            {
                let mut state = record.state.write().await;
                let outcome = self
                    .recovery
                    .attempt_recovery(&mut state, health, cycle.consecutive_failures)
                    .await?;
                match outcome {
                    RecoveryOutcome::Restored => {
                        self.metrics.rollbacks.fetch_add(1, Ordering::Relaxed);
                    }
                    RecoveryOutcome::Quarantined => {
                        self.metrics.quarantines.fetch_add(1, Ordering::Relaxed);
                    }
                    RecoveryOutcome::StillDegraded => {}
                }
            }

            self.alerts
                .observe(entity_id, &previous_verdict, &verdict, reason.score());
            let message = reason.to_string();
            cycle.last_verdict = verdict;
            return Err(CoordError::HealthGate(message));
        }

        candidate.progress = (candidate.progress + self.progress_step).min(1.0);
        if candidate.progress >= 1.0 && !candidate.level.is_highest() {
            candidate.level = candidate.level.next();
            candidate.progress = 0.0;
            self.metrics.level_advances.fetch_add(1, Ordering::Relaxed);
            info!(
                entity_id = %entity_id,
                level = %candidate.level,
                "📈 Entity advanced to next maturity stage"
            );
        }
        candidate.status = EntityStatus::Active;
        candidate
            .validate()
            .map_err(|e| CoordError::Validation(e.to_string()))?;

        // Durable snapshot first: a cycle that cannot be recorded is not
        // committed, since rollback depends on the history.
        let snapshot_id = self
            .store
            .append(
                entity_id,
                SnapshotDraft {
                    level: candidate.level,
                    health_score: candidate.health_score,
                    stability_score: candidate.stability_score,
                },
            )
            .await?;
        candidate.last_snapshot_id = Some(snapshot_id);

        *record.state.write().await = candidate.clone();
        cycle.consecutive_failures = 0;

        self.alerts
            .observe(entity_id, &previous_verdict, &verdict, health);
        cycle.last_verdict = verdict;

        if let Err(e) = self.store.prune(entity_id).await {
            warn!(entity_id = %entity_id, error = %e, "Snapshot pruning failed");
        }

        Ok(candidate)
    }

    /// Read-only metrics projection for the monitoring collaborator.
    pub async fn metrics_snapshot(&self, entity_id: EntityId) -> CoordResult<MetricsSnapshot> {
        let state = self
            .status(entity_id)
            .await
            .ok_or(CoordError::NotFound(entity_id))?;

        let mut history = self.store.history(entity_id, METRICS_SCAN_LIMIT);
        let mut snapshots = Vec::new();
        while let Some(snapshot) = history.next().await {
            snapshots.push(snapshot?);
        }

        Ok(MetricsSnapshot {
            entity_id,
            level: state.level,
            status: state.status,
            health_score: state.health_score,
            stability_score: state.stability_score,
            progress: state.progress,
            snapshot_count: snapshots.len() as u64,
            advances_per_hour: advance_rate(&snapshots),
            last_snapshot_at: snapshots.first().map(|s| s.timestamp),
        })
    }

    #[must_use]
    pub fn system_metrics(&self) -> Arc<CoordinatorMetrics> {
        self.metrics.clone()
    }

    #[must_use]
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.iter().map(|e| *e.key()).collect()
    }
}

fn clamp_score(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
