use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a monitored entity.
/// Opaque: the coordinator attaches no semantics beyond identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Default generates a random UUID v4 (intentional design).
/// For deterministic IDs, use `EntityId::from_name()` instead.
impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic ID derived from a stable name (UUID v5).
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let namespace = Uuid::NAMESPACE_DNS;
        Self(Uuid::new_v5(&namespace, name.as_bytes()))
    }
}

/// Ordered maturity stages. Fixed at four; ordering is the only semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageLevel {
    L0 = 0,
    L1 = 1,
    L2 = 2,
    L3 = 3,
}

// Custom serialization: emit as the stage index for storage and dashboards.
impl Serialize for StageLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.index())
    }
}

impl<'de> Deserialize<'de> for StageLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de;

        struct StageVisitor;
        impl de::Visitor<'_> for StageVisitor {
            type Value = StageLevel;
            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a stage index 0-3 or a string like \"L2\"")
            }
            fn visit_u64<E: de::Error>(self, v: u64) -> Result<StageLevel, E> {
                Ok(StageLevel::from_index(v.min(u64::from(u8::MAX)) as u8))
            }
            fn visit_i64<E: de::Error>(self, v: i64) -> Result<StageLevel, E> {
                self.visit_u64(v.max(0) as u64)
            }
            fn visit_str<E: de::Error>(self, v: &str) -> Result<StageLevel, E> {
                match v {
                    "L0" => Ok(StageLevel::L0),
                    "L1" => Ok(StageLevel::L1),
                    "L2" => Ok(StageLevel::L2),
                    "L3" => Ok(StageLevel::L3),
                    _ => Err(de::Error::unknown_variant(v, &["L0", "L1", "L2", "L3"])),
                }
            }
        }
        deserializer.deserialize_any(StageVisitor)
    }
}

impl StageLevel {
    /// The lowest stage, assigned at registration.
    pub const LOWEST: StageLevel = StageLevel::L0;

    #[must_use]
    pub fn index(&self) -> u8 {
        *self as u8
    }

    /// Create from a stage index, saturating out-of-range values to the
    /// highest stage.
    #[must_use]
    pub fn from_index(i: u8) -> Self {
        match i {
            0 => Self::L0,
            1 => Self::L1,
            2 => Self::L2,
            _ => Self::L3,
        }
    }

    /// The next stage up; the highest stage returns itself.
    #[must_use]
    pub fn next(&self) -> Self {
        Self::from_index(self.index().saturating_add(1))
    }

    #[must_use]
    pub fn is_highest(&self) -> bool {
        *self == Self::L3
    }
}

impl std::fmt::Display for StageLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.index())
    }
}

/// Per-entity lifecycle status. `Quarantined` is terminal: it is never
/// auto-cleared and requires deregister + register to reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityStatus {
    Active,
    Degraded,
    Quarantined,
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Quarantined => write!(f, "Quarantined"),
        }
    }
}

/// Immutable record of a committed state, used for metrics and rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Strictly increasing per entity; assigned by the store.
    pub id: u64,
    pub level: StageLevel,
    pub health_score: f64,
    pub stability_score: f64,
    pub timestamp: DateTime<Utc>,
}

/// The caller-supplied part of a snapshot; id and timestamp are assigned by
/// the store at append time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDraft {
    pub level: StageLevel,
    pub health_score: f64,
    pub stability_score: f64,
}

/// Append-only snapshot history, one ordered sequence per entity.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Append a snapshot and return its id. Fails only on storage-medium
    /// failure (`CoordError::Store`), never due to content.
    async fn append(&self, entity_id: EntityId, draft: SnapshotDraft) -> CoordResult<u64>;

    /// The most recent committed snapshot, or `None` if the entity has never
    /// completed a cycle.
    async fn latest(&self, entity_id: EntityId) -> CoordResult<Option<Snapshot>>;

    /// Newest-first history, at most `limit` entries. The stream is lazy and
    /// restartable: every call starts a fresh read.
    fn history(&self, entity_id: EntityId, limit: usize) -> BoxStream<'_, CoordResult<Snapshot>>;

    /// Remove snapshots beyond the store's retention policy; returns the
    /// number removed. The most recent snapshot is never pruned.
    async fn prune(&self, entity_id: EntityId) -> CoordResult<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "Info"),
            Self::Warning => write!(f, "Warning"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// Edge-triggered threshold notification. Emitted only on transitions across
/// a threshold boundary, never repeatedly while a score stays on one side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub entity_id: EntityId,
    pub severity: AlertSeverity,
    pub reason: String,
    pub triggering_score: f64,
    pub timestamp: DateTime<Utc>,
}

/// External alert consumer. Delivery is best-effort: errors are logged by the
/// alert manager and never propagated into an evolution cycle.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: Alert) -> anyhow::Result<()>;
}

// Explicit serde tagging for consistent serialization across consumers.
#[derive(Debug, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum CoordError {
    #[error("Entity already registered: {0}")]
    AlreadyExists(EntityId),
    #[error("Entity not found: {0}")]
    NotFound(EntityId),
    #[error("Evolution cycle already in flight for entity {0}")]
    Busy(EntityId),
    #[error("Entity {0} is quarantined")]
    Quarantined(EntityId),
    #[error("Health gate failed: {0}")]
    HealthGate(String),
    #[error("Snapshot store error: {0}")]
    Store(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

pub type CoordResult<T> = std::result::Result<T, CoordError>;
