use std::sync::atomic::AtomicU64;

use ascend_shared::Snapshot;

/// Process-wide coordinator counters, shared with the monitoring
/// collaborator.
pub struct CoordinatorMetrics {
    pub cycles_total: AtomicU64,
    pub cycles_failed: AtomicU64,
    pub level_advances: AtomicU64,
    pub rollbacks: AtomicU64,
    pub quarantines: AtomicU64,
}

impl Default for CoordinatorMetrics {
    fn default() -> Self {
        Self {
            cycles_total: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            level_advances: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
            quarantines: AtomicU64::new(0),
        }
    }
}

impl CoordinatorMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Level advances per hour over the observed window.
///
/// `history` is newest-first, as produced by the snapshot store. Rollbacks
/// appear as level decreases in the record and do not count as advances.
#[must_use]
pub fn advance_rate(history: &[Snapshot]) -> f64 {
    if history.len() < 2 {
        return 0.0;
    }
    let newest = &history[0];
    let oldest = &history[history.len() - 1];

    let advances = history.windows(2).filter(|w| w[0].level > w[1].level).count();

    let span_hours = (newest.timestamp - oldest.timestamp).num_milliseconds() as f64 / 3_600_000.0;
    if span_hours <= 0.0 {
        return 0.0;
    }
    advances as f64 / span_hours
}
