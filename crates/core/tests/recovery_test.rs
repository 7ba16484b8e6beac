//! Recovery and quarantine behavior: soft degradation, rollback to the last
//! known-good snapshot, and retry-budget exhaustion.

use std::sync::Arc;

use ascend_core::config::ThresholdConfig;
use ascend_core::coordinator::EvolutionCoordinator;
use ascend_core::test_utils::{create_test_coordinator, ScriptedScorer};
use ascend_shared::{CoordError, EntityId, EntityStatus, StageLevel};

async fn setup(scorer: Arc<ScriptedScorer>) -> Arc<EvolutionCoordinator> {
    create_test_coordinator(scorer, ThresholdConfig::default(), 0.34).await
}

#[tokio::test]
async fn test_soft_failure_degrades_without_rollback() {
    let scorer = Arc::new(ScriptedScorer::new((1.0, 1.0)));
    let coordinator = setup(scorer.clone()).await;
    let entity_id = EntityId::new();
    coordinator.register(entity_id).unwrap();

    coordinator.evolve(entity_id).await.unwrap();
    let before = coordinator.status(entity_id).await.unwrap();

    // 0.4 is below min_health (0.5) but not below critical_health (0.3).
    scorer.push(0.4, 1.0);
    let err = coordinator.evolve(entity_id).await.unwrap_err();
    assert!(matches!(err, CoordError::HealthGate(_)));

    let after = coordinator.status(entity_id).await.unwrap();
    assert_eq!(after.status, EntityStatus::Degraded);
    assert_eq!(after.level, before.level, "soft failure does not roll back");
    assert_eq!(after.health_score, before.health_score);
    assert_eq!(after.progress, before.progress);
}

#[tokio::test]
async fn test_degraded_returns_to_active_on_success() {
    let scorer = Arc::new(ScriptedScorer::new((1.0, 1.0)));
    let coordinator = setup(scorer.clone()).await;
    let entity_id = EntityId::new();
    coordinator.register(entity_id).unwrap();

    coordinator.evolve(entity_id).await.unwrap();
    scorer.push(0.4, 1.0);
    let _ = coordinator.evolve(entity_id).await;
    assert_eq!(
        coordinator.status(entity_id).await.unwrap().status,
        EntityStatus::Degraded
    );

    coordinator.evolve(entity_id).await.unwrap();
    assert_eq!(
        coordinator.status(entity_id).await.unwrap().status,
        EntityStatus::Active
    );
}

// Recovery invariant: restored values equal a snapshot's recorded values
// that previously passed the gate.
#[tokio::test]
async fn test_critical_failure_restores_snapshot_values() {
    let scorer = Arc::new(ScriptedScorer::new((1.0, 1.0)));
    let coordinator = setup(scorer.clone()).await;
    let entity_id = EntityId::new();
    coordinator.register(entity_id).unwrap();

    scorer.push(0.8, 0.9);
    coordinator.evolve(entity_id).await.unwrap();
    let committed = coordinator.status(entity_id).await.unwrap();

    scorer.push(0.1, 1.0);
    let err = coordinator.evolve(entity_id).await.unwrap_err();
    assert!(matches!(err, CoordError::HealthGate(_)));

    let restored = coordinator.status(entity_id).await.unwrap();
    assert_eq!(restored.status, EntityStatus::Degraded);
    assert_eq!(restored.level, committed.level);
    assert_eq!(restored.health_score, 0.8);
    assert_eq!(restored.stability_score, 0.9);
    assert_eq!(restored.progress, 0.0);
    assert_eq!(restored.last_snapshot_id, committed.last_snapshot_id);
}

#[tokio::test]
async fn test_critical_failure_with_no_history_quarantines() {
    let scorer = Arc::new(ScriptedScorer::new((1.0, 1.0)));
    let coordinator = setup(scorer.clone()).await;
    let entity_id = EntityId::new();
    coordinator.register(entity_id).unwrap();

    // No successful cycle has ever run: history is empty.
    scorer.push(0.1, 1.0);
    let _ = coordinator.evolve(entity_id).await;

    let state = coordinator.status(entity_id).await.unwrap();
    assert_eq!(state.status, EntityStatus::Quarantined);
}

// Quarantine termination: max_retries + 1 consecutive failures with no
// successful recovery flips the entity to Quarantined, which then rejects
// every evolve call.
#[tokio::test]
async fn test_retry_budget_exhaustion_quarantines() {
    let scorer = Arc::new(ScriptedScorer::new((1.0, 1.0)));
    let coordinator = setup(scorer.clone()).await;
    let entity_id = EntityId::new();
    coordinator.register(entity_id).unwrap();

    coordinator.evolve(entity_id).await.unwrap();

    // max_retries = 2: failures 1 and 2 degrade, failure 3 quarantines.
    scorer.push_many(&[(0.4, 1.0), (0.4, 1.0), (0.4, 1.0)]);
    for _ in 0..3 {
        let err = coordinator.evolve(entity_id).await.unwrap_err();
        assert!(matches!(err, CoordError::HealthGate(_)));
    }

    let state = coordinator.status(entity_id).await.unwrap();
    assert_eq!(state.status, EntityStatus::Quarantined);

    let err = coordinator.evolve(entity_id).await.unwrap_err();
    assert!(matches!(err, CoordError::Quarantined(id) if id == entity_id));
}

#[tokio::test]
async fn test_success_resets_the_failure_counter() {
    let scorer = Arc::new(ScriptedScorer::new((1.0, 1.0)));
    let coordinator = setup(scorer.clone()).await;
    let entity_id = EntityId::new();
    coordinator.register(entity_id).unwrap();

    coordinator.evolve(entity_id).await.unwrap();

    // Two failures, a success, then two more failures: never exceeds the
    // budget of 2 consecutive, so no quarantine.
    scorer.push_many(&[(0.4, 1.0), (0.4, 1.0)]);
    let _ = coordinator.evolve(entity_id).await;
    let _ = coordinator.evolve(entity_id).await;
    coordinator.evolve(entity_id).await.unwrap();
    scorer.push_many(&[(0.4, 1.0), (0.4, 1.0)]);
    let _ = coordinator.evolve(entity_id).await;
    let _ = coordinator.evolve(entity_id).await;

    let state = coordinator.status(entity_id).await.unwrap();
    assert_eq!(state.status, EntityStatus::Degraded);
    assert_ne!(state.status, EntityStatus::Quarantined);
}

#[tokio::test]
async fn test_rollback_restores_newest_passing_snapshot() {
    let scorer = Arc::new(ScriptedScorer::new((1.0, 1.0)));
    let coordinator = setup(scorer.clone()).await;
    let entity_id = EntityId::new();
    coordinator.register(entity_id).unwrap();

    // One clean snapshot, then one that warns but still passes (0.55).
    coordinator.evolve(entity_id).await.unwrap();
    scorer.push(0.55, 1.0);
    coordinator.evolve(entity_id).await.unwrap();

    scorer.push(0.1, 1.0);
    let _ = coordinator.evolve(entity_id).await;

    // The newest snapshot (0.55) passed the gate, so it is the restore target.
    let state = coordinator.status(entity_id).await.unwrap();
    assert_eq!(state.health_score, 0.55);
    assert_eq!(state.status, EntityStatus::Degraded);
}

#[tokio::test]
async fn test_rollback_counts_toward_metrics() {
    let scorer = Arc::new(ScriptedScorer::new((1.0, 1.0)));
    let coordinator = setup(scorer.clone()).await;
    let entity_id = EntityId::new();
    coordinator.register(entity_id).unwrap();

    coordinator.evolve(entity_id).await.unwrap();
    scorer.push(0.1, 1.0);
    let _ = coordinator.evolve(entity_id).await;

    let counters = coordinator.system_metrics();
    assert_eq!(
        counters.rollbacks.load(std::sync::atomic::Ordering::Relaxed),
        1
    );
    assert_eq!(
        counters
            .cycles_failed
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
}
