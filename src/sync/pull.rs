//! Pull of central changes into the local replica
//!
//! For each project, rows newer than the project's cursor are streamed in
//! `sync_version` order and upserted by `unique_id` with the dirty flag
//! cleared. Local rows that are still dirty are left alone; their edits go
//! out with the next push. The cursor only moves after the project's upserts
//! commit, so an interrupted pull re-applies at most one project's rows,
//! which is harmless.

use std::collections::HashSet;

use futures::TryStreamExt;
use sqlx::SqlitePool;

use crate::db::{
    placeholders, synced_column_list, Activity, CentralStore, LocalStore, SYNCED_COLUMNS,
};
use crate::error::{Result, SyncError};

use super::store::CursorStore;
use super::types::{ProjectCursor, PullReport, PushedRecord};

/// Central rows a pull should not apply
enum Exclusion<'e> {
    /// These ids at any version
    Ids(HashSet<&'e str>),
    /// Exactly these writes; later versions of the same ids still apply
    Writes(HashSet<(&'e str, i64)>),
}

impl Exclusion<'_> {
    fn skips(&self, activity: &Activity) -> bool {
        match self {
            Exclusion::Ids(ids) => ids.contains(activity.unique_id.as_str()),
            Exclusion::Writes(writes) => {
                writes.contains(&(activity.unique_id.as_str(), activity.sync_version))
            }
        }
    }
}

fn select_since_sql() -> String {
    format!(
        r#"
        SELECT record_id, {}, 0 AS local_dirty, sync_version
        FROM activities
        WHERE project_id = ? AND sync_version > ?
        ORDER BY sync_version ASC
        "#,
        synced_column_list()
    )
}

fn upsert_sql() -> String {
    let assignments: Vec<String> = SYNCED_COLUMNS
        .iter()
        .filter(|c| **c != "unique_id")
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();

    format!(
        r#"
        INSERT INTO activities (record_id, {}, sync_version, local_dirty)
        VALUES (?, {}, ?, 0)
        ON CONFLICT(unique_id) DO UPDATE SET
            record_id = excluded.record_id,
            {},
            sync_version = excluded.sync_version,
            local_dirty = 0
        WHERE activities.local_dirty = 0
        "#,
        synced_column_list(),
        placeholders(SYNCED_COLUMNS.len()),
        assignments.join(",\n            ")
    )
}

/// Pulls central changes for a set of projects
pub struct PullEngine<'a> {
    local: &'a SqlitePool,
    central: &'a SqlitePool,
}

impl<'a> PullEngine<'a> {
    pub fn new(local: &'a LocalStore, central: &'a CentralStore) -> Self {
        Self {
            local: local.pool(),
            central: central.pool(),
        }
    }

    /// Pull every project, skipping `exclude` ids at any version
    pub async fn pull(&self, project_ids: &[String], exclude: &[String]) -> Result<PullReport> {
        let excluded = Exclusion::Ids(exclude.iter().map(String::as_str).collect());
        self.pull_with(project_ids, &excluded).await
    }

    /// Pull every project, skipping only the exact writes a push just made
    pub async fn pull_after_push(
        &self,
        project_ids: &[String],
        pushed: &[PushedRecord],
    ) -> Result<PullReport> {
        let excluded = Exclusion::Writes(
            pushed
                .iter()
                .map(|p| (p.unique_id.as_str(), p.sync_version))
                .collect(),
        );
        self.pull_with(project_ids, &excluded).await
    }

    async fn pull_with(&self, project_ids: &[String], excluded: &Exclusion<'_>) -> Result<PullReport> {
        let cursors = CursorStore::new(self.local);
        let mut report = PullReport::default();

        for project_id in project_ids {
            let cursor = cursors.get(project_id).await?;
            let (applied, max_seen) = self.pull_project(project_id, cursor, excluded).await?;

            if max_seen > cursor {
                cursors.advance(project_id, max_seen).await?;
            }

            tracing::debug!(
                project = %project_id,
                applied,
                from = cursor,
                to = max_seen.max(cursor),
                "Pulled project"
            );

            report.pulled += applied;
            report.cursors.push(ProjectCursor {
                project_id: project_id.clone(),
                last_pulled_sync_version: max_seen.max(cursor),
            });
        }

        tracing::info!(pulled = report.pulled, projects = project_ids.len(), "Pull complete");
        Ok(report)
    }

    /// Apply one project's newer rows in a single local transaction.
    /// Returns the number applied and the highest version seen, skipped
    /// rows included.
    async fn pull_project(
        &self,
        project_id: &str,
        cursor: i64,
        excluded: &Exclusion<'_>,
    ) -> Result<(usize, i64)> {
        let select_sql = select_since_sql();
        let upsert_sql = upsert_sql();

        let mut rows = sqlx::query_as::<_, Activity>(&select_sql)
            .bind(project_id)
            .bind(cursor)
            .fetch(self.central);

        let mut tx = self.local.begin().await.map_err(SyncError::local)?;
        let mut applied = 0;
        let mut max_seen = cursor;

        while let Some(activity) = rows.try_next().await.map_err(SyncError::central)? {
            max_seen = max_seen.max(activity.sync_version);
            if excluded.skips(&activity) {
                continue;
            }

            let query = sqlx::query(&upsert_sql).bind(activity.record_id);
            let result = activity
                .bind_synced(query)
                .bind(activity.sync_version)
                .execute(&mut *tx)
                .await
                .map_err(SyncError::local)?;

            if result.rows_affected() == 0 {
                tracing::debug!(
                    unique_id = %activity.unique_id,
                    sync_version = activity.sync_version,
                    "Kept unpushed local edit over central row"
                );
                continue;
            }
            applied += 1;
        }
        drop(rows);

        tx.commit().await.map_err(SyncError::local)?;
        Ok((applied, max_seen))
    }
}
