use ascend_shared::{EntityId, EntityStatus, StageLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Live per-entity state. Owned exclusively by the coordinator; mutated only
/// inside the entity's locked cycle. Readers always observe the last
/// committed values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionState {
    pub entity_id: EntityId,
    /// Monotonically non-decreasing except under explicit rollback.
    pub level: StageLevel,
    pub health_score: f64,
    pub stability_score: f64,
    /// In [0.0, 1.0]; resets to 0 on each level advance.
    pub progress: f64,
    pub status: EntityStatus,
    pub last_snapshot_id: Option<u64>,
}

impl EvolutionState {
    /// State assigned at registration: lowest stage, perfect scores, active.
    #[must_use]
    pub fn initial(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            level: StageLevel::LOWEST,
            health_score: 1.0,
            stability_score: 1.0,
            progress: 0.0,
            status: EntityStatus::Active,
            last_snapshot_id: None,
        }
    }

    /// Validates that all bounded values are finite and within [0.0, 1.0].
    pub fn validate(&self) -> anyhow::Result<()> {
        let fields = [
            ("health_score", self.health_score),
            ("stability_score", self.stability_score),
            ("progress", self.progress),
        ];
        for (name, val) in fields {
            if !val.is_finite() || !(0.0..=1.0).contains(&val) {
                anyhow::bail!("{} must be in [0.0, 1.0], got {}", name, val);
            }
        }
        Ok(())
    }
}

/// External scoring capability. The coordinator never defines how health is
/// measured; the embedding application injects this at construction time.
///
/// Must be cheap and non-blocking: it runs synchronously inside the entity's
/// locked cycle.
pub trait Scorer: Send + Sync {
    /// Returns `(health, stability)` for the entity's current state. Values
    /// are clamped to [0.0, 1.0] by the coordinator.
    fn score(&self, state: &EvolutionState) -> (f64, f64);
}

impl<F> Scorer for F
where
    F: Fn(&EvolutionState) -> (f64, f64) + Send + Sync,
{
    fn score(&self, state: &EvolutionState) -> (f64, f64) {
        self(state)
    }
}

/// Read-only projection of an entity's state plus rates derived from its
/// snapshot history. For dashboards and the monitoring collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub entity_id: EntityId,
    pub level: StageLevel,
    pub status: EntityStatus,
    pub health_score: f64,
    pub stability_score: f64,
    pub progress: f64,
    pub snapshot_count: u64,
    pub advances_per_hour: f64,
    pub last_snapshot_at: Option<DateTime<Utc>>,
}
