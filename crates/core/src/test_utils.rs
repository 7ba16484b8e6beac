use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use sqlx::SqlitePool;

use crate::alerts::AlertManager;
use crate::config::{RetentionPolicy, ThresholdConfig};
use crate::coordinator::{EvolutionCoordinator, EvolutionState, Scorer};
use crate::metrics::CoordinatorMetrics;
use crate::store::SqliteSnapshotStore;

/// Scorer that replays queued `(health, stability)` pairs, then falls back to
/// a fixed value. Lets tests script exact gate sequences.
pub struct ScriptedScorer {
    queue: Mutex<VecDeque<(f64, f64)>>,
    fallback: (f64, f64),
}

impl ScriptedScorer {
    #[must_use]
    pub fn new(fallback: (f64, f64)) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
        }
    }

    pub fn push(&self, health: f64, stability: f64) {
        self.queue.lock().unwrap().push_back((health, stability));
    }

    pub fn push_many(&self, pairs: &[(f64, f64)]) {
        let mut queue = self.queue.lock().unwrap();
        queue.extend(pairs.iter().copied());
    }
}

impl Scorer for ScriptedScorer {
    fn score(&self, _state: &EvolutionState) -> (f64, f64) {
        self.queue.lock().unwrap().pop_front().unwrap_or(self.fallback)
    }
}

pub async fn memory_store() -> Arc<SqliteSnapshotStore> {
    memory_store_with(RetentionPolicy::default()).await
}

pub async fn memory_store_with(retention: RetentionPolicy) -> Arc<SqliteSnapshotStore> {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    SqliteSnapshotStore::init(&pool).await.unwrap();
    Arc::new(SqliteSnapshotStore::new(pool, retention))
}

pub async fn create_test_coordinator(
    scorer: Arc<dyn Scorer>,
    thresholds: ThresholdConfig,
    progress_step: f64,
) -> Arc<EvolutionCoordinator> {
    let store = memory_store().await;
    let alerts = AlertManager::new(thresholds.critical_health, 64);
    Arc::new(EvolutionCoordinator::new(
        store,
        alerts,
        scorer,
        thresholds,
        progress_step,
        Arc::new(CoordinatorMetrics::new()),
    ))
}
