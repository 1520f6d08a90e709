//! Push of locally dirty records to the central store
//!
//! Dirty records are split into inserts and updates by whether their
//! `unique_id` already exists centrally. Updates pass an ownership gate
//! first: a record whose central owner differs from its local owner is
//! rejected and stays dirty. Each batch runs in one central transaction; a
//! failing row is rolled back to its own savepoint and reported, and the
//! rest of the batch still commits.

use std::collections::{BTreeMap, HashMap, HashSet};

use sqlx::{Connection, SqliteConnection, SqlitePool};

use crate::db::{
    placeholders, synced_column_list, Activity, ActivityRepository, CentralStore, LocalStore,
    SYNCED_COLUMNS,
};
use crate::error::{Result, SyncError};

use super::store::CursorStore;
use super::types::{PushFailure, PushReport, PushedRecord, REASON_MISSING_CENTRALLY, REASON_NOT_ASSIGNED};
use super::version::VersionAuthority;

pub(crate) const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchKind {
    Insert,
    Update,
}

impl BatchKind {
    fn sql(self) -> String {
        match self {
            BatchKind::Insert => format!(
                "INSERT INTO activities ({}, sync_version) VALUES ({}, ?)",
                synced_column_list(),
                placeholders(SYNCED_COLUMNS.len())
            ),
            BatchKind::Update => {
                let assignments: Vec<String> =
                    SYNCED_COLUMNS.iter().map(|c| format!("{} = ?", c)).collect();
                format!(
                    "UPDATE activities SET {}, sync_version = ? WHERE unique_id = ?",
                    assignments.join(", ")
                )
            }
        }
    }

    fn label(self) -> &'static str {
        match self {
            BatchKind::Insert => "insert",
            BatchKind::Update => "update",
        }
    }
}

#[derive(Debug, Default)]
struct BatchOutcome {
    written: Vec<String>,
    failed: Vec<PushFailure>,
}

/// Pushes dirty local records for a set of projects
pub struct PushEngine<'a> {
    local: &'a SqlitePool,
    central: &'a SqlitePool,
    batch_size: usize,
}

impl<'a> PushEngine<'a> {
    pub fn new(local: &'a LocalStore, central: &'a CentralStore) -> Self {
        Self {
            local: local.pool(),
            central: central.pool(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn push(&self, project_ids: &[String]) -> Result<PushReport> {
        let dirty = ActivityRepository::new(self.local)
            .dirty_in_projects(project_ids)
            .await?;

        let mut report = PushReport::default();
        if dirty.is_empty() {
            tracing::debug!(projects = ?project_ids, "Nothing to push");
            return Ok(report);
        }

        let ids: Vec<&str> = dirty.iter().map(|a| a.unique_id.as_str()).collect();
        let remote_owners = self.remote_owners(&ids).await?;

        let mut to_update = Vec::new();
        let mut to_insert = Vec::new();
        for activity in &dirty {
            match remote_owners.get(&activity.unique_id) {
                Some(owner) if *owner != activity.assigned_to => {
                    tracing::warn!(
                        unique_id = %activity.unique_id,
                        local_owner = ?activity.assigned_to,
                        central_owner = ?owner,
                        "Rejecting update for reassigned record"
                    );
                    report
                        .failed
                        .push(PushFailure::new(&activity.unique_id, REASON_NOT_ASSIGNED));
                }
                Some(_) => to_update.push(activity),
                None => to_insert.push(activity),
            }
        }

        let mut written = Vec::new();

        if !to_update.is_empty() {
            let outcome = self.apply_batch(&to_update, BatchKind::Update).await?;
            report.updated = outcome.written.len();
            written.extend(outcome.written);
            report.failed.extend(outcome.failed);
        }

        if !to_insert.is_empty() {
            let outcome = self.apply_batch(&to_insert, BatchKind::Insert).await?;
            report.inserted = outcome.written.len();
            written.extend(outcome.written);
            report.failed.extend(outcome.failed);
        }

        if !written.is_empty() {
            let scanned: HashMap<&str, &str> = dirty
                .iter()
                .map(|a| (a.unique_id.as_str(), a.modified_at.as_str()))
                .collect();
            let pushed = self.read_back(&written).await?;
            self.reconcile_local(&pushed, &scanned).await?;
            self.advance_cursors(&pushed).await?;
            report.pushed = pushed;
        }

        tracing::info!(
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failed.len(),
            "Push complete"
        );
        Ok(report)
    }

    /// Central owner for every id that exists centrally
    async fn remote_owners(&self, ids: &[&str]) -> Result<HashMap<String, Option<String>>> {
        let mut owners = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(self.batch_size) {
            let sql = format!(
                "SELECT unique_id, assigned_to FROM activities WHERE unique_id IN ({})",
                placeholders(chunk.len())
            );
            let mut q = sqlx::query_as::<_, (String, Option<String>)>(&sql);
            for id in chunk {
                q = q.bind(*id);
            }

            let rows = q.fetch_all(self.central).await.map_err(SyncError::central)?;
            owners.extend(rows);
        }

        Ok(owners)
    }

    async fn apply_batch(&self, rows: &[&Activity], kind: BatchKind) -> Result<BatchOutcome> {
        let sql = kind.sql();
        let mut outcome = BatchOutcome::default();

        let mut tx = self.central.begin().await.map_err(SyncError::central)?;
        for activity in rows {
            match apply_row(&mut tx, &sql, activity, kind).await {
                Ok(()) => outcome.written.push(activity.unique_id.clone()),
                Err(reason) => {
                    tracing::warn!(
                        unique_id = %activity.unique_id,
                        kind = kind.label(),
                        %reason,
                        "Central write failed"
                    );
                    outcome.failed.push(PushFailure::new(&activity.unique_id, reason));
                }
            }
        }
        tx.commit().await.map_err(SyncError::central)?;

        tracing::debug!(
            kind = kind.label(),
            written = outcome.written.len(),
            failed = outcome.failed.len(),
            "Committed central batch"
        );
        Ok(outcome)
    }

    /// Central identity and version of every written record
    async fn read_back(&self, ids: &[String]) -> Result<Vec<PushedRecord>> {
        let mut pushed = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(self.batch_size) {
            let sql = format!(
                "SELECT unique_id, project_id, record_id, sync_version FROM activities WHERE unique_id IN ({})",
                placeholders(chunk.len())
            );
            let mut q = sqlx::query_as::<_, PushedRecord>(&sql);
            for id in chunk {
                q = q.bind(id);
            }

            pushed.extend(q.fetch_all(self.central).await.map_err(SyncError::central)?);
        }

        pushed.sort_by_key(|p| p.sync_version);
        Ok(pushed)
    }

    /// Copy central identity onto the local rows and clear their dirty flags.
    ///
    /// A row edited again since the dirty scan (its `modified_at` moved)
    /// keeps its flag so the newer edit goes out with the next push.
    async fn reconcile_local(
        &self,
        pushed: &[PushedRecord],
        scanned: &HashMap<&str, &str>,
    ) -> Result<()> {
        let mut tx = self.local.begin().await.map_err(SyncError::local)?;
        for record in pushed {
            let Some(modified_at) = scanned.get(record.unique_id.as_str()) else {
                continue;
            };

            sqlx::query(
                r#"
                UPDATE activities
                SET record_id = ?, sync_version = ?,
                    local_dirty = CASE WHEN modified_at = ? THEN 0 ELSE local_dirty END
                WHERE unique_id = ?
                "#,
            )
            .bind(record.record_id)
            .bind(record.sync_version)
            .bind(*modified_at)
            .bind(&record.unique_id)
            .execute(&mut *tx)
            .await
            .map_err(SyncError::local)?;
        }
        tx.commit().await.map_err(SyncError::local)?;
        Ok(())
    }

    /// Move each pushed project's cursor past the rows just written, unless a
    /// row from another writer sits in between and still needs pulling.
    async fn advance_cursors(&self, pushed: &[PushedRecord]) -> Result<()> {
        let mut by_project: BTreeMap<&str, Vec<&PushedRecord>> = BTreeMap::new();
        for record in pushed {
            by_project
                .entry(record.project_id.as_str())
                .or_default()
                .push(record);
        }

        let cursors = CursorStore::new(self.local);
        for (project_id, records) in by_project {
            let max = records.iter().map(|r| r.sync_version).max().unwrap_or(0);
            let cursor = cursors.get(project_id).await?;
            if max <= cursor {
                continue;
            }

            let ours: HashSet<(&str, i64)> = records
                .iter()
                .map(|r| (r.unique_id.as_str(), r.sync_version))
                .collect();

            let in_range: Vec<(String, i64)> = sqlx::query_as(
                r#"
                SELECT unique_id, sync_version FROM activities
                WHERE project_id = ? AND sync_version > ? AND sync_version <= ?
                "#,
            )
            .bind(project_id)
            .bind(cursor)
            .bind(max)
            .fetch_all(self.central)
            .await
            .map_err(SyncError::central)?;

            let foreign = in_range
                .iter()
                .any(|(id, version)| !ours.contains(&(id.as_str(), *version)));
            if foreign {
                tracing::debug!(
                    project = project_id,
                    cursor,
                    max,
                    "Leaving cursor for pull; other writers landed in range"
                );
                continue;
            }

            cursors.advance(project_id, max).await?;
        }

        Ok(())
    }
}

/// Write one row inside its own savepoint, taking a fresh central version
async fn apply_row(
    conn: &mut SqliteConnection,
    sql: &str,
    activity: &Activity,
    kind: BatchKind,
) -> std::result::Result<(), String> {
    let mut row_tx = conn.begin().await.map_err(|e| e.to_string())?;

    let version = VersionAuthority::next_version(&mut row_tx)
        .await
        .map_err(|e| e.to_string())?;

    let query = activity.bind_synced(sqlx::query(sql)).bind(version);
    let query = match kind {
        BatchKind::Insert => query,
        BatchKind::Update => query.bind(&activity.unique_id),
    };
    let result = query.execute(&mut *row_tx).await.map_err(|e| e.to_string())?;

    if kind == BatchKind::Update && result.rows_affected() == 0 {
        row_tx.rollback().await.map_err(|e| e.to_string())?;
        return Err(REASON_MISSING_CENTRALLY.to_string());
    }

    row_tx.commit().await.map_err(|e| e.to_string())?;
    Ok(())
}
