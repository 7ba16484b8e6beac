use serde::{Deserialize, Serialize};

use crate::config::ThresholdConfig;

use super::types::EvolutionState;

// ══════════════════════════════════════════════════════════════
// Pure Functions
// ══════════════════════════════════════════════════════════════

/// Why the health gate rejected a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GateReason {
    HealthFloor { score: f64, floor: f64 },
    StabilityFloor { score: f64, floor: f64 },
}

impl GateReason {
    /// The score that tripped the gate.
    #[must_use]
    pub fn score(&self) -> f64 {
        match self {
            Self::HealthFloor { score, .. } | Self::StabilityFloor { score, .. } => *score,
        }
    }
}

impl std::fmt::Display for GateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HealthFloor { score, floor } => {
                write!(f, "health {:.3} below floor {:.3}", score, floor)
            }
            Self::StabilityFloor { score, floor } => {
                write!(f, "stability {:.3} below floor {:.3}", score, floor)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HealthVerdict {
    Pass,
    /// Within `warn_margin` above a floor. Never blocks a cycle; only feeds
    /// non-critical alerting.
    Warn,
    Fail(GateReason),
}

impl HealthVerdict {
    /// Rank used for edge detection: Pass < Warn < Fail.
    #[must_use]
    pub fn severity(&self) -> u8 {
        match self {
            Self::Pass => 0,
            Self::Warn => 1,
            Self::Fail(_) => 2,
        }
    }

    #[must_use]
    pub fn is_fail(&self) -> bool {
        matches!(self, Self::Fail(_))
    }
}

/// Evaluate the health gate against the configured floors.
///
/// Pure and deterministic given its inputs. Floors are exclusive: a score
/// exactly at a floor is not a failure. Health is checked before stability,
/// so a state failing both reports the health floor.
#[must_use]
pub fn evaluate(state: &EvolutionState, thresholds: &ThresholdConfig) -> HealthVerdict {
    if state.health_score < thresholds.min_health {
        return HealthVerdict::Fail(GateReason::HealthFloor {
            score: state.health_score,
            floor: thresholds.min_health,
        });
    }
    if state.stability_score < thresholds.min_stability {
        return HealthVerdict::Fail(GateReason::StabilityFloor {
            score: state.stability_score,
            floor: thresholds.min_stability,
        });
    }

    let comfort_health = thresholds.min_health + thresholds.warn_margin;
    let comfort_stability = thresholds.min_stability + thresholds.warn_margin;
    if state.health_score < comfort_health || state.stability_score < comfort_stability {
        return HealthVerdict::Warn;
    }

    HealthVerdict::Pass
}

/// Whether a failing health score is bad enough to warrant a rollback rather
/// than a plain degradation.
#[must_use]
pub fn is_critical(health: f64, thresholds: &ThresholdConfig) -> bool {
    health < thresholds.critical_health
}
