use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use ascend_shared::{CoordError, EntityId};

use crate::coordinator::EvolutionCoordinator;

/// Drives periodic evolution cycles for one entity.
///
/// Expected per-cycle outcomes (gate rejections, contention) are logged, not
/// propagated. The task stops on the shutdown signal, when the entity is
/// quarantined, or when it has been deregistered.
pub struct CycleRunner;

impl CycleRunner {
    pub fn spawn(
        coordinator: Arc<EvolutionCoordinator>,
        entity_id: EntityId,
        period: Duration,
        shutdown: Arc<Notify>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            // Overlapping ticks are harmless (evolve fails fast with Busy),
            // but there is no point queueing them up.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                entity_id = %entity_id,
                period_ms = period.as_millis() as u64,
                "Cycle runner started"
            );

            loop {
                tokio::select! {
                    () = shutdown.notified() => {
                        info!(entity_id = %entity_id, "Cycle runner shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match coordinator.evolve(entity_id).await {
                            Ok(state) => debug!(
                                entity_id = %entity_id,
                                level = %state.level,
                                progress = state.progress,
                                "Cycle committed"
                            ),
                            Err(CoordError::Busy(_)) => {
                                debug!(entity_id = %entity_id, "Cycle still in flight; tick skipped");
                            }
                            Err(CoordError::HealthGate(reason)) => {
                                warn!(entity_id = %entity_id, %reason, "Cycle rejected by health gate");
                            }
                            Err(CoordError::Quarantined(_)) => {
                                warn!(entity_id = %entity_id, "Entity quarantined; cycle runner stopping");
                                break;
                            }
                            Err(CoordError::NotFound(_)) => {
                                debug!(entity_id = %entity_id, "Entity deregistered; cycle runner stopping");
                                break;
                            }
                            Err(e) => {
                                warn!(entity_id = %entity_id, error = %e, "Cycle failed");
                            }
                        }
                    }
                }
            }
        })
    }
}
