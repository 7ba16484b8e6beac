mod engine;
mod health;
mod types;

pub use engine::EvolutionCoordinator;
pub use health::{evaluate, is_critical, GateReason, HealthVerdict};
pub use types::{EvolutionState, MetricsSnapshot, Scorer};
