//! Activity records in the local replica

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Business columns copied verbatim between the local and central stores,
/// in the order [`Activity::bind_synced`] binds them.
pub const SYNCED_COLUMNS: [&str; 12] = [
    "unique_id",
    "project_id",
    "activity_no",
    "description",
    "assigned_to",
    "status",
    "percent_complete",
    "planned_start",
    "planned_finish",
    "remarks",
    "modified_by",
    "modified_at",
];

/// Comma-separated [`SYNCED_COLUMNS`]
pub fn synced_column_list() -> String {
    SYNCED_COLUMNS.join(", ")
}

/// `?` placeholders for `n` bound values
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// A project activity as held by either store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Activity {
    /// Client-generated identity, never reassigned
    pub unique_id: String,
    /// Central surrogate key, known once the record has been pushed
    pub record_id: Option<i64>,
    pub project_id: String,
    /// Ownership key shared by records expected to have one owner
    pub activity_no: Option<String>,
    pub description: String,
    pub assigned_to: Option<String>,
    pub status: String,
    pub percent_complete: f64,
    pub planned_start: Option<String>,
    pub planned_finish: Option<String>,
    pub remarks: Option<String>,
    pub modified_by: Option<String>,
    pub modified_at: String,
    pub local_dirty: bool,
    pub sync_version: i64,
}

impl Activity {
    /// Bind the synced business fields in [`SYNCED_COLUMNS`] order
    pub fn bind_synced<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        query
            .bind(&self.unique_id)
            .bind(&self.project_id)
            .bind(&self.activity_no)
            .bind(&self.description)
            .bind(&self.assigned_to)
            .bind(&self.status)
            .bind(self.percent_complete)
            .bind(&self.planned_start)
            .bind(&self.planned_finish)
            .bind(&self.remarks)
            .bind(&self.modified_by)
            .bind(&self.modified_at)
    }
}

/// Fields for a locally created activity
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewActivity {
    pub project_id: String,
    pub activity_no: Option<String>,
    #[serde(default)]
    pub description: String,
    pub assigned_to: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub percent_complete: f64,
    pub planned_start: Option<String>,
    pub planned_finish: Option<String>,
    pub remarks: Option<String>,
    pub modified_by: Option<String>,
}

/// A local edit; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityEdit {
    pub activity_no: Option<String>,
    pub description: Option<String>,
    pub assigned_to: Option<String>,
    pub status: Option<String>,
    pub percent_complete: Option<f64>,
    pub planned_start: Option<String>,
    pub planned_finish: Option<String>,
    pub remarks: Option<String>,
    pub modified_by: Option<String>,
}

const SELECT_ACTIVITY: &str = r#"
    SELECT unique_id, record_id, project_id, activity_no, description, assigned_to,
           status, percent_complete, planned_start, planned_finish, remarks,
           modified_by, modified_at, local_dirty, sync_version
    FROM activities
"#;

/// Activity repository over the local store
pub struct ActivityRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ActivityRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a record that has never been pushed
    pub async fn create(&self, new: &NewActivity) -> Result<Activity> {
        if new.project_id.trim().is_empty() {
            return Err(SyncError::BadRequest("project_id is required".to_string()));
        }

        let activity = Activity {
            unique_id: Uuid::new_v4().to_string(),
            record_id: None,
            project_id: new.project_id.clone(),
            activity_no: new.activity_no.clone(),
            description: new.description.clone(),
            assigned_to: new.assigned_to.clone(),
            status: new.status.clone().unwrap_or_else(|| "not_started".to_string()),
            percent_complete: new.percent_complete,
            planned_start: new.planned_start.clone(),
            planned_finish: new.planned_finish.clone(),
            remarks: new.remarks.clone(),
            modified_by: new.modified_by.clone(),
            modified_at: Utc::now().to_rfc3339(),
            local_dirty: true,
            sync_version: 0,
        };

        let sql = format!(
            "INSERT INTO activities ({}, local_dirty, sync_version) VALUES ({}, 1, 0)",
            synced_column_list(),
            placeholders(SYNCED_COLUMNS.len())
        );
        activity
            .bind_synced(sqlx::query(&sql))
            .execute(self.pool)
            .await
            .map_err(SyncError::local)?;

        tracing::debug!(unique_id = %activity.unique_id, project = %activity.project_id, "Created activity");
        Ok(activity)
    }

    /// Apply a local edit and mark the record dirty
    pub async fn update(&self, unique_id: &str, edit: &ActivityEdit) -> Result<Activity> {
        let mut activity = self
            .get(unique_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("Activity not found: {}", unique_id)))?;

        if let Some(v) = &edit.activity_no {
            activity.activity_no = Some(v.clone());
        }
        if let Some(v) = &edit.description {
            activity.description = v.clone();
        }
        if let Some(v) = &edit.assigned_to {
            activity.assigned_to = Some(v.clone());
        }
        if let Some(v) = &edit.status {
            activity.status = v.clone();
        }
        if let Some(v) = edit.percent_complete {
            activity.percent_complete = v;
        }
        if let Some(v) = &edit.planned_start {
            activity.planned_start = Some(v.clone());
        }
        if let Some(v) = &edit.planned_finish {
            activity.planned_finish = Some(v.clone());
        }
        if let Some(v) = &edit.remarks {
            activity.remarks = Some(v.clone());
        }
        if let Some(v) = &edit.modified_by {
            activity.modified_by = Some(v.clone());
        }
        activity.modified_at = Utc::now().to_rfc3339();
        activity.local_dirty = true;

        sqlx::query(
            r#"
            UPDATE activities
            SET activity_no = ?, description = ?, assigned_to = ?, status = ?,
                percent_complete = ?, planned_start = ?, planned_finish = ?,
                remarks = ?, modified_by = ?, modified_at = ?, local_dirty = 1
            WHERE unique_id = ?
            "#,
        )
        .bind(&activity.activity_no)
        .bind(&activity.description)
        .bind(&activity.assigned_to)
        .bind(&activity.status)
        .bind(activity.percent_complete)
        .bind(&activity.planned_start)
        .bind(&activity.planned_finish)
        .bind(&activity.remarks)
        .bind(&activity.modified_by)
        .bind(&activity.modified_at)
        .bind(unique_id)
        .execute(self.pool)
        .await
        .map_err(SyncError::local)?;

        Ok(activity)
    }

    /// Get a record by its unique id
    pub async fn get(&self, unique_id: &str) -> Result<Option<Activity>> {
        let sql = format!("{} WHERE unique_id = ?", SELECT_ACTIVITY);
        sqlx::query_as::<_, Activity>(&sql)
            .bind(unique_id)
            .fetch_optional(self.pool)
            .await
            .map_err(SyncError::local)
    }

    /// All records in a project
    pub async fn list_by_project(&self, project_id: &str) -> Result<Vec<Activity>> {
        let sql = format!(
            "{} WHERE project_id = ? ORDER BY activity_no, unique_id",
            SELECT_ACTIVITY
        );
        sqlx::query_as::<_, Activity>(&sql)
            .bind(project_id)
            .fetch_all(self.pool)
            .await
            .map_err(SyncError::local)
    }

    /// Records changed since their last successful push, across projects
    pub async fn dirty_in_projects(&self, project_ids: &[String]) -> Result<Vec<Activity>> {
        if project_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "{} WHERE local_dirty = 1 AND project_id IN ({}) ORDER BY project_id, unique_id",
            SELECT_ACTIVITY,
            placeholders(project_ids.len())
        );
        let mut q = sqlx::query_as::<_, Activity>(&sql);
        for id in project_ids {
            q = q.bind(id);
        }

        q.fetch_all(self.pool).await.map_err(SyncError::local)
    }

    /// Number of dirty records in a project
    pub async fn count_dirty(&self, project_id: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM activities WHERE project_id = ? AND local_dirty = 1",
        )
        .bind(project_id)
        .fetch_one(self.pool)
        .await
        .map_err(SyncError::local)?;

        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;

    fn new_activity(project: &str, key: &str, owner: &str) -> NewActivity {
        NewActivity {
            project_id: project.to_string(),
            activity_no: Some(key.to_string()),
            description: format!("Activity {}", key),
            assigned_to: Some(owner.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_starts_dirty_and_unversioned() {
        let local = testing::replica().await;
        let repo = local.activities();

        let created = repo.create(&new_activity("P-1", "A100", "alice")).await.unwrap();
        assert!(created.local_dirty);
        assert_eq!(created.sync_version, 0);
        assert!(created.record_id.is_none());

        let fetched = repo.get(&created.unique_id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_create_requires_project() {
        let local = testing::replica().await;
        let err = local
            .activities()
            .create(&NewActivity::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_update_marks_dirty() {
        let local = testing::replica().await;
        let repo = local.activities();
        let created = repo.create(&new_activity("P-1", "A100", "alice")).await.unwrap();

        sqlx::query("UPDATE activities SET local_dirty = 0 WHERE unique_id = ?")
            .bind(&created.unique_id)
            .execute(local.pool())
            .await
            .unwrap();
        assert_eq!(repo.count_dirty("P-1").await.unwrap(), 0);

        let edit = ActivityEdit {
            percent_complete: Some(40.0),
            remarks: Some("poured".to_string()),
            ..Default::default()
        };
        let updated = repo.update(&created.unique_id, &edit).await.unwrap();
        assert!(updated.local_dirty);
        assert_eq!(updated.percent_complete, 40.0);
        assert_eq!(updated.description, created.description);
        assert_eq!(repo.count_dirty("P-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let local = testing::replica().await;
        let err = local
            .activities()
            .update("nope", &ActivityEdit::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_dirty_in_projects_filters_scope() {
        let local = testing::replica().await;
        let repo = local.activities();
        repo.create(&new_activity("P-1", "A100", "alice")).await.unwrap();
        repo.create(&new_activity("P-2", "B100", "alice")).await.unwrap();
        repo.create(&new_activity("P-3", "C100", "alice")).await.unwrap();

        let dirty = repo
            .dirty_in_projects(&["P-1".to_string(), "P-3".to_string()])
            .await
            .unwrap();
        assert_eq!(dirty.len(), 2);
        assert!(dirty.iter().all(|a| a.project_id != "P-2"));
        assert!(repo.dirty_in_projects(&[]).await.unwrap().is_empty());
    }

    #[test]
    fn test_field_table_shape() {
        assert_eq!(synced_column_list().split(", ").count(), SYNCED_COLUMNS.len());
        assert_eq!(placeholders(3), "?, ?, ?");
    }
}
