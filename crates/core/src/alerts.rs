use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, warn};

use ascend_shared::{Alert, AlertSeverity, AlertSink, EntityId};

use crate::coordinator::HealthVerdict;

type SinkList = Arc<RwLock<Vec<Arc<dyn AlertSink>>>>;

/// Edge-triggered alert dispatcher.
///
/// Alerts flow through an internal queue drained by a single forwarder task,
/// so delivery order per entity matches trigger order. Delivery is
/// fire-and-forget: a failing sink or a full queue is logged and never fails
/// the evolution cycle that raised the alert.
pub struct AlertManager {
    queue_tx: mpsc::Sender<Alert>,
    subscribers: broadcast::Sender<Alert>,
    sinks: SinkList,
    critical_floor: f64,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl AlertManager {
    #[must_use]
    pub fn new(critical_floor: f64, buffer: usize) -> Arc<Self> {
        let (queue_tx, mut queue_rx) = mpsc::channel::<Alert>(buffer);
        let (subscribers, _) = broadcast::channel(buffer);
        let sinks: SinkList = Arc::new(RwLock::new(Vec::new()));

        let fan_out = sinks.clone();
        let broadcast_tx = subscribers.clone();
        tokio::spawn(async move {
            while let Some(alert) = queue_rx.recv().await {
                // Subscribers with no receiver are fine; send just reports 0.
                let _ = broadcast_tx.send(alert.clone());

                let sinks = fan_out.read().await;
                for sink in sinks.iter() {
                    if let Err(e) = sink.deliver(alert.clone()).await {
                        warn!(
                            entity_id = %alert.entity_id,
                            severity = %alert.severity,
                            error = %e,
                            "Alert sink delivery failed"
                        );
                    }
                }
            }
        });

        Arc::new(Self {
            queue_tx,
            subscribers,
            sinks,
            critical_floor,
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    pub async fn register_sink(&self, sink: Arc<dyn AlertSink>) {
        self.sinks.write().await.push(sink);
    }

    /// Pull-style subscription; receives alerts in delivery order.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.subscribers.subscribe()
    }

    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Called once per cycle with the before/after gate verdicts.
    ///
    /// Raises an alert only when severity strictly increases, plus a
    /// recovery-clear alert on a return to Pass. Non-blocking: alerts are
    /// handed to the forwarder queue with `try_send`.
    pub fn observe(
        &self,
        entity_id: EntityId,
        previous: &HealthVerdict,
        current: &HealthVerdict,
        score: f64,
    ) {
        let Some((severity, reason)) = classify(previous, current, score, self.critical_floor)
        else {
            return;
        };

        let alert = Alert {
            entity_id,
            severity,
            reason,
            triggering_score: score,
            timestamp: Utc::now(),
        };

        match self.queue_tx.try_send(alert) {
            Ok(()) => {
                self.emitted.fetch_add(1, Ordering::Relaxed);
                debug!(entity_id = %entity_id, severity = %severity, "Alert queued");
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(entity_id = %entity_id, "Alert queue full; alert dropped");
            }
        }
    }
}

/// Edge detection. Returns the alert to raise, if any.
fn classify(
    previous: &HealthVerdict,
    current: &HealthVerdict,
    score: f64,
    critical_floor: f64,
) -> Option<(AlertSeverity, String)> {
    if current.severity() > previous.severity() {
        return Some(match current {
            HealthVerdict::Fail(reason) => {
                let severity = if score < critical_floor {
                    AlertSeverity::Critical
                } else {
                    AlertSeverity::Warning
                };
                (severity, reason.to_string())
            }
            HealthVerdict::Warn => (
                AlertSeverity::Warning,
                format!("score {:.3} within warning margin of floor", score),
            ),
            HealthVerdict::Pass => unreachable!("Pass has the lowest severity"),
        });
    }

    // Recovery-clear: Fail→Pass or Warn→Pass.
    if previous.severity() > 0 && matches!(current, HealthVerdict::Pass) {
        return Some((
            AlertSeverity::Info,
            "scores recovered above configured floors".to_string(),
        ));
    }

    None
}
