pub mod alerts;
pub mod config;
pub mod coordinator;
pub mod metrics;
pub mod recovery;
pub mod runner;
pub mod store;
pub mod test_utils;

pub use alerts::AlertManager;
pub use config::{AppConfig, RetentionPolicy, ThresholdConfig};
pub use coordinator::{
    EvolutionCoordinator, EvolutionState, GateReason, HealthVerdict, MetricsSnapshot, Scorer,
};
pub use metrics::CoordinatorMetrics;
pub use recovery::{RecoveryController, RecoveryOutcome};
pub use runner::CycleRunner;
pub use store::SqliteSnapshotStore;
