//! PostgreSQL-backed `SnapshotStore` implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::{
    db::traits::{check_head, SnapshotStore},
    models::{
        now_micros, ExpectedVersion, HistoryQuery, HistorySlice, ResourceKey, Snapshot,
        SnapshotAction,
    },
    Error, Result,
};

#[derive(Clone)]
pub struct PostgresSnapshotStore {
    pub(crate) pool: PgPool,
}

impl PostgresSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create or upgrade the snapshot tables.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to run migrations: {}", e)))?;
        Ok(())
    }

    async fn head(&self, key: &ResourceKey) -> Result<Option<(i32, SnapshotAction)>> {
        let row = sqlx::query(
            "SELECT version, action FROM resource_heads
             WHERE kind = $1 AND id = $2",
        )
        .bind(&key.kind)
        .bind(&key.id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(r) => Ok(Some((r.get("version"), parse_action(r.get("action"))?))),
            None => Ok(None),
        }
    }

    /// Explain why a conditional write matched no row.
    async fn rejection(
        &self,
        key: &ResourceKey,
        expected: ExpectedVersion,
        action: SnapshotAction,
    ) -> Error {
        let head = match self.head(key).await {
            Ok(head) => head,
            Err(e) => return e,
        };
        match check_head(key, head, expected, action) {
            Err(e) => e,
            // The head moved again between the write and this read.
            Ok(_) => Error::VersionConflict {
                expected: match expected {
                    ExpectedVersion::AtVersion(v) => v,
                    ExpectedVersion::Absent => 0,
                },
                actual: head.map(|(v, _)| v).unwrap_or(0),
            },
        }
    }
}

fn parse_action(raw: String) -> Result<SnapshotAction> {
    raw.parse().map_err(Error::Storage)
}

fn row_to_snapshot(key: &ResourceKey, r: &PgRow) -> Result<Snapshot> {
    Ok(Snapshot {
        key: key.clone(),
        version: r.get("version"),
        action: parse_action(r.get("action"))?,
        body: r.get("body"),
        recorded_at: r.get("recorded_at"),
    })
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    async fn snapshot_append(
        &self,
        key: &ResourceKey,
        expected: ExpectedVersion,
        action: SnapshotAction,
        body: JsonValue,
    ) -> Result<Snapshot> {
        // Reject impossible combinations and an exhausted version space before
        // touching the database.
        if let Err(e @ Error::Storage(_)) = check_head(key, None, expected, action) {
            return Err(e);
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let now = now_micros();

        let head = match expected {
            ExpectedVersion::Absent => sqlx::query(
                "INSERT INTO resource_heads (kind, id, version, action, recorded_at)
                 VALUES ($1, $2, 1, $3, $4)
                 ON CONFLICT (kind, id) DO NOTHING
                 RETURNING version, recorded_at",
            )
            .bind(&key.kind)
            .bind(&key.id)
            .bind(action.as_str())
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?,
            ExpectedVersion::AtVersion(version) => sqlx::query(
                "UPDATE resource_heads
                 SET version = version + 1,
                     action = $4,
                     recorded_at = GREATEST($5, recorded_at)
                 WHERE kind = $1 AND id = $2 AND version = $3 AND action <> 'delete'
                 RETURNING version, recorded_at",
            )
            .bind(&key.kind)
            .bind(&key.id)
            .bind(version)
            .bind(action.as_str())
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?,
        };

        let Some(head) = head else {
            tx.rollback().await.map_err(Error::Database)?;
            return Err(self.rejection(key, expected, action).await);
        };

        let version: i32 = head.get("version");
        let recorded_at: DateTime<Utc> = head.get("recorded_at");

        sqlx::query(
            "INSERT INTO resource_snapshots (kind, id, version, action, body, recorded_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&key.kind)
        .bind(&key.id)
        .bind(version)
        .bind(action.as_str())
        .bind(&body)
        .bind(recorded_at)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        Ok(Snapshot {
            key: key.clone(),
            version,
            action,
            body,
            recorded_at,
        })
    }

    async fn snapshot_latest(&self, key: &ResourceKey) -> Result<Option<Snapshot>> {
        let row = sqlx::query(
            "SELECT version, action, body, recorded_at
             FROM resource_snapshots
             WHERE kind = $1 AND id = $2
             ORDER BY version DESC
             LIMIT 1",
        )
        .bind(&key.kind)
        .bind(&key.id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(|r| row_to_snapshot(key, &r)).transpose()
    }

    async fn snapshot_version(&self, key: &ResourceKey, version: i32) -> Result<Option<Snapshot>> {
        let row = sqlx::query(
            "SELECT version, action, body, recorded_at
             FROM resource_snapshots
             WHERE kind = $1 AND id = $2 AND version = $3",
        )
        .bind(&key.kind)
        .bind(&key.id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(|r| row_to_snapshot(key, &r)).transpose()
    }

    async fn snapshot_history(
        &self,
        key: &ResourceKey,
        query: &HistoryQuery,
    ) -> Result<HistorySlice> {
        let rows = sqlx::query(
            "SELECT version, action, body, recorded_at
             FROM resource_snapshots
             WHERE kind = $1 AND id = $2
               AND ($3::INTEGER IS NULL OR version < $3)
               AND ($4::TIMESTAMPTZ IS NULL OR recorded_at >= $4)
             ORDER BY version DESC
             LIMIT $5",
        )
        .bind(&key.kind)
        .bind(&key.id)
        .bind(query.before_version)
        .bind(query.since)
        .bind(query.count.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let entries = rows
            .iter()
            .map(|r| row_to_snapshot(key, r))
            .collect::<Result<Vec<_>>>()?;

        let total_row = sqlx::query(
            "SELECT COUNT(*) AS count
             FROM resource_snapshots
             WHERE kind = $1 AND id = $2
               AND ($3::INTEGER IS NULL OR version < $3)
               AND ($4::TIMESTAMPTZ IS NULL OR recorded_at >= $4)",
        )
        .bind(&key.kind)
        .bind(&key.id)
        .bind(query.before_version)
        .bind(query.since)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        let total: i64 = total_row.get("count");

        Ok(HistorySlice { entries, total })
    }
}
