//! Pull cursor persistence
//!
//! One `last_pulled_sync_version` per project in the local store.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::{Result, SyncError};

/// Repository for per-project pull cursors
pub struct CursorStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CursorStore<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Current cursor for a project (0 before the first pull)
    pub async fn get(&self, project_id: &str) -> Result<i64> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT last_pulled_sync_version FROM sync_cursors WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_optional(self.pool)
        .await
        .map_err(SyncError::local)?;

        Ok(row.map(|(v,)| v).unwrap_or(0))
    }

    /// When the cursor last moved
    pub async fn last_advanced_at(&self, project_id: &str) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT updated_at FROM sync_cursors WHERE project_id = ?")
                .bind(project_id)
                .fetch_optional(self.pool)
                .await
                .map_err(SyncError::local)?;

        Ok(row
            .and_then(|(s,)| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    /// Move the cursor forward to `version`. Returns false when the stored
    /// cursor is already at or past it; the cursor never moves backward.
    pub async fn advance(&self, project_id: &str, version: i64) -> Result<bool> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO sync_cursors (project_id, last_pulled_sync_version, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(project_id) DO UPDATE SET
                last_pulled_sync_version = excluded.last_pulled_sync_version,
                updated_at = excluded.updated_at
            WHERE excluded.last_pulled_sync_version > sync_cursors.last_pulled_sync_version
            "#,
        )
        .bind(project_id)
        .bind(version)
        .bind(&now)
        .execute(self.pool)
        .await
        .map_err(SyncError::local)?;

        Ok(result.rows_affected() > 0)
    }
}
