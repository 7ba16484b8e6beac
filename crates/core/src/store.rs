use async_stream::try_stream;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use sqlx::SqlitePool;
use tokio::time::{timeout, Duration};

use ascend_shared::{
    CoordError, CoordResult, EntityId, Snapshot, SnapshotDraft, SnapshotStore, StageLevel,
};

use crate::config::RetentionPolicy;

// Database operation timeout to prevent indefinite hangs on locks.
const DB_TIMEOUT_SECS: u64 = 10;

/// Page size for the lazy history stream.
const HISTORY_PAGE: usize = 64;

fn store_err(e: sqlx::Error) -> CoordError {
    CoordError::Store(e.to_string())
}

fn timeout_err() -> CoordError {
    CoordError::Store(format!(
        "database operation timed out after {}s",
        DB_TIMEOUT_SECS
    ))
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    id: i64,
    level: i64,
    health_score: f64,
    stability_score: f64,
    timestamp: i64,
}

impl SnapshotRow {
    fn into_snapshot(self) -> CoordResult<Snapshot> {
        let timestamp = chrono::DateTime::from_timestamp_millis(self.timestamp)
            .ok_or_else(|| CoordError::Store(format!("invalid timestamp {}", self.timestamp)))?;
        Ok(Snapshot {
            id: self.id as u64,
            level: StageLevel::from_index(self.level.clamp(0, i64::from(u8::MAX)) as u8),
            health_score: self.health_score,
            stability_score: self.stability_score,
            timestamp,
        })
    }
}

/// SQLite-backed snapshot history. Append-only: rows are never rewritten;
/// only `prune` removes rows, and only per the retention policy.
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
    retention: RetentionPolicy,
}

impl SqliteSnapshotStore {
    #[must_use]
    pub fn new(pool: SqlitePool, retention: RetentionPolicy) -> Self {
        Self { pool, retention }
    }

    /// Create the snapshot table if it does not exist yet.
    pub async fn init(pool: &SqlitePool) -> CoordResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS snapshots (\
                 entity_id TEXT NOT NULL, \
                 id INTEGER NOT NULL, \
                 level INTEGER NOT NULL, \
                 health_score REAL NOT NULL, \
                 stability_score REAL NOT NULL, \
                 timestamp INTEGER NOT NULL, \
                 PRIMARY KEY (entity_id, id))",
        )
        .execute(pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    /// Allocates the next id and inserts in a single statement, so ids are
    /// strictly increasing per entity even without an external lock.
    async fn append(&self, entity_id: EntityId, draft: SnapshotDraft) -> CoordResult<u64> {
        let now_ms = Utc::now().timestamp_millis();
        let query_future = sqlx::query_as::<_, (i64,)>(
            "INSERT INTO snapshots (entity_id, id, level, health_score, stability_score, timestamp) \
             SELECT ?, COALESCE(MAX(id), 0) + 1, ?, ?, ?, ? FROM snapshots WHERE entity_id = ? \
             RETURNING id",
        )
        .bind(entity_id.to_string())
        .bind(i64::from(draft.level.index()))
        .bind(draft.health_score)
        .bind(draft.stability_score)
        .bind(now_ms)
        .bind(entity_id.to_string())
        .fetch_one(&self.pool);

        let (id,) = timeout(Duration::from_secs(DB_TIMEOUT_SECS), query_future)
            .await
            .map_err(|_| timeout_err())?
            .map_err(store_err)?;
        Ok(id as u64)
    }

    async fn latest(&self, entity_id: EntityId) -> CoordResult<Option<Snapshot>> {
        let query_future = sqlx::query_as::<_, SnapshotRow>(
            "SELECT id, level, health_score, stability_score, timestamp FROM snapshots \
             WHERE entity_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(entity_id.to_string())
        .fetch_optional(&self.pool);

        let row = timeout(Duration::from_secs(DB_TIMEOUT_SECS), query_future)
            .await
            .map_err(|_| timeout_err())?
            .map_err(store_err)?;
        row.map(SnapshotRow::into_snapshot).transpose()
    }

    fn history(&self, entity_id: EntityId, limit: usize) -> BoxStream<'_, CoordResult<Snapshot>> {
        Box::pin(try_stream! {
            let mut remaining = limit;
            let mut before = i64::MAX;
            while remaining > 0 {
                let page = remaining.min(HISTORY_PAGE);
                let query_future = sqlx::query_as::<_, SnapshotRow>(
                    "SELECT id, level, health_score, stability_score, timestamp FROM snapshots \
                     WHERE entity_id = ? AND id < ? ORDER BY id DESC LIMIT ?",
                )
                .bind(entity_id.to_string())
                .bind(before)
                .bind(page as i64)
                .fetch_all(&self.pool);

                let rows = timeout(Duration::from_secs(DB_TIMEOUT_SECS), query_future)
                    .await
                    .map_err(|_| timeout_err())?
                    .map_err(store_err)?;
                if rows.is_empty() {
                    break;
                }
                for row in rows {
                    before = row.id;
                    remaining -= 1;
                    let snapshot = row.into_snapshot()?;
                    yield snapshot;
                }
            }
        })
    }

    async fn prune(&self, entity_id: EntityId) -> CoordResult<u64> {
        let cutoff_ms = (Utc::now()
            - chrono::Duration::hours(self.retention.max_age_hours as i64))
        .timestamp_millis();

        // Rows must be both older than the window and outside the newest
        // `min_retained`. The floor of 1 keeps the latest snapshot even if
        // the policy was constructed without validation.
        let keep = self.retention.min_retained.max(1);
        let query_future = sqlx::query(
            "DELETE FROM snapshots WHERE entity_id = ? AND timestamp < ? AND id NOT IN (\
                 SELECT id FROM snapshots WHERE entity_id = ? ORDER BY id DESC LIMIT ?)",
        )
        .bind(entity_id.to_string())
        .bind(cutoff_ms)
        .bind(entity_id.to_string())
        .bind(i64::from(keep))
        .execute(&self.pool);

        let result = timeout(Duration::from_secs(DB_TIMEOUT_SECS), query_future)
            .await
            .map_err(|_| timeout_err())?
            .map_err(store_err)?;
        Ok(result.rows_affected())
    }
}
