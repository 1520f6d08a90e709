//! Split ownership detection and resolution
//!
//! Records sharing an activity number are expected to have one owner. When
//! the central store holds a different owner for a key the local user still
//! owns locally, the central owner wins: local records are reassigned and
//! re-pushed under that owner. Content is kept; only attribution changes.

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::{placeholders, CentralStore, LocalStore};
use crate::error::{Result, SyncError};

use super::push::{PushEngine, DEFAULT_BATCH_SIZE};
use super::types::{OwnershipIssue, ResolveResponse};

/// Detects and resolves split ownership for one project at a time
pub struct OwnershipConflictResolver<'a> {
    local: &'a LocalStore,
    central: &'a CentralStore,
    batch_size: usize,
}

impl<'a> OwnershipConflictResolver<'a> {
    pub fn new(local: &'a LocalStore, central: &'a CentralStore) -> Self {
        Self {
            local,
            central,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn local_pool(&self) -> &SqlitePool {
        self.local.pool()
    }

    fn central_pool(&self) -> &SqlitePool {
        self.central.pool()
    }

    /// Keys the user owns locally that the central store gives to someone else
    pub async fn detect(&self, project_id: &str, user: &str) -> Result<Vec<OwnershipIssue>> {
        let local_keys: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT activity_no, COUNT(*) FROM activities
            WHERE project_id = ? AND assigned_to = ?
              AND activity_no IS NOT NULL AND activity_no <> ''
            GROUP BY activity_no
            ORDER BY activity_no
            "#,
        )
        .bind(project_id)
        .bind(user)
        .fetch_all(self.local_pool())
        .await
        .map_err(SyncError::local)?;

        if local_keys.is_empty() {
            return Ok(Vec::new());
        }

        // Most recent central owner per key
        let mut central_owners: BTreeMap<String, String> = BTreeMap::new();
        for chunk in local_keys.chunks(self.batch_size) {
            let sql = format!(
                r#"
                SELECT activity_no, assigned_to FROM activities
                WHERE project_id = ? AND activity_no IN ({})
                  AND assigned_to IS NOT NULL AND assigned_to <> ?
                ORDER BY sync_version DESC
                "#,
                placeholders(chunk.len())
            );
            let mut q = sqlx::query_as::<_, (String, String)>(&sql).bind(project_id);
            for (key, _) in chunk {
                q = q.bind(key);
            }
            let rows = q
                .bind(user)
                .fetch_all(self.central_pool())
                .await
                .map_err(SyncError::central)?;

            for (key, owner) in rows {
                central_owners.entry(key).or_insert(owner);
            }
        }

        let issues: Vec<OwnershipIssue> = local_keys
            .into_iter()
            .filter_map(|(key, local_count)| {
                central_owners.get(&key).map(|owner| OwnershipIssue {
                    central_owner: owner.clone(),
                    key,
                    local_count,
                })
            })
            .collect();

        if !issues.is_empty() {
            tracing::warn!(
                project = project_id,
                user,
                keys = issues.len(),
                "Split ownership detected"
            );
        }
        Ok(issues)
    }

    /// Yield every issue to its central owner, then re-push the project.
    ///
    /// The affected local rows are marked dirty first, then the user's own
    /// central rows for them are removed so the re-push inserts them under
    /// the new owner instead of tripping the ownership gate. Interrupted at
    /// any step, the records are still dirty locally and the next push
    /// restores them centrally.
    pub async fn resolve(
        &self,
        project_id: &str,
        user: &str,
        issues: &[OwnershipIssue],
    ) -> Result<ResolveResponse> {
        let mut reassignments: Vec<(String, String)> = Vec::new();
        for issue in issues {
            if issue.central_owner == user {
                tracing::warn!(key = %issue.key, "Ignoring issue that names the local user as owner");
                continue;
            }

            let ids: Vec<(String,)> = sqlx::query_as(
                "SELECT unique_id FROM activities WHERE project_id = ? AND assigned_to = ? AND activity_no = ?",
            )
            .bind(project_id)
            .bind(user)
            .bind(&issue.key)
            .fetch_all(self.local_pool())
            .await
            .map_err(SyncError::local)?;

            reassignments.extend(
                ids.into_iter()
                    .map(|(id,)| (id, issue.central_owner.clone())),
            );
        }

        if reassignments.is_empty() {
            return Ok(ResolveResponse {
                reassigned: 0,
                push: Default::default(),
            });
        }

        self.mark_pending(user, &reassignments).await?;
        self.delete_stale_central_rows(user, &reassignments).await?;

        let now = Utc::now().to_rfc3339();
        let mut tx = self.local_pool().begin().await.map_err(SyncError::local)?;
        for (unique_id, owner) in &reassignments {
            sqlx::query(
                r#"
                UPDATE activities
                SET assigned_to = ?, local_dirty = 1, modified_at = ?
                WHERE unique_id = ? AND assigned_to = ?
                "#,
            )
            .bind(owner)
            .bind(&now)
            .bind(unique_id)
            .bind(user)
            .execute(&mut *tx)
            .await
            .map_err(SyncError::local)?;
        }
        tx.commit().await.map_err(SyncError::local)?;

        tracing::info!(
            project = project_id,
            user,
            reassigned = reassignments.len(),
            "Reassigned records to central owners"
        );

        let push = PushEngine::new(self.local, self.central)
            .with_batch_size(self.batch_size)
            .push(&[project_id.to_string()])
            .await?;

        Ok(ResolveResponse {
            reassigned: reassignments.len(),
            push,
        })
    }

    /// Flag the records for re-push before their central copies go away
    async fn mark_pending(&self, user: &str, reassignments: &[(String, String)]) -> Result<()> {
        let mut tx = self.local_pool().begin().await.map_err(SyncError::local)?;
        for chunk in reassignments.chunks(self.batch_size) {
            let sql = format!(
                "UPDATE activities SET local_dirty = 1 WHERE assigned_to = ? AND unique_id IN ({})",
                placeholders(chunk.len())
            );
            let mut q = sqlx::query(&sql).bind(user);
            for (unique_id, _) in chunk {
                q = q.bind(unique_id);
            }
            q.execute(&mut *tx).await.map_err(SyncError::local)?;
        }
        tx.commit().await.map_err(SyncError::local)?;
        Ok(())
    }

    async fn delete_stale_central_rows(
        &self,
        user: &str,
        reassignments: &[(String, String)],
    ) -> Result<()> {
        let mut tx = self.central_pool().begin().await.map_err(SyncError::central)?;
        let mut deleted = 0;

        for chunk in reassignments.chunks(self.batch_size) {
            let sql = format!(
                "DELETE FROM activities WHERE assigned_to = ? AND unique_id IN ({})",
                placeholders(chunk.len())
            );
            let mut q = sqlx::query(&sql).bind(user);
            for (unique_id, _) in chunk {
                q = q.bind(unique_id);
            }
            deleted += q
                .execute(&mut *tx)
                .await
                .map_err(SyncError::central)?
                .rows_affected();
        }

        tx.commit().await.map_err(SyncError::central)?;
        tracing::debug!(deleted, "Removed stale central rows before re-push");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{testing, NewActivity};
    use crate::sync::types::REASON_NOT_ASSIGNED;

    fn new_activity(project: &str, key: &str, owner: &str) -> NewActivity {
        NewActivity {
            project_id: project.to_string(),
            activity_no: Some(key.to_string()),
            description: format!("Install conduit {}", key),
            assigned_to: Some(owner.to_string()),
            ..Default::default()
        }
    }

    fn p1() -> Vec<String> {
        vec!["P-1".to_string()]
    }

    #[tokio::test]
    async fn test_no_issues_when_owners_agree() {
        let (local, central) = testing::stores().await;
        local.activities().create(&new_activity("P-1", "A100", "alice")).await.unwrap();
        PushEngine::new(&local, &central).push(&p1()).await.unwrap();

        let issues = OwnershipConflictResolver::new(&local, &central)
            .detect("P-1", "alice")
            .await
            .unwrap();
        assert!(issues.is_empty());
    }

    #[tokio::test]
    async fn test_detects_key_owned_centrally_by_someone_else() {
        let (alice, central) = testing::stores().await;
        let bob = testing::replica().await;

        bob.activities().create(&new_activity("P-1", "A100", "bob")).await.unwrap();
        PushEngine::new(&bob, &central).push(&p1()).await.unwrap();

        alice.activities().create(&new_activity("P-1", "A100", "alice")).await.unwrap();
        alice.activities().create(&new_activity("P-1", "A100", "alice")).await.unwrap();
        alice.activities().create(&new_activity("P-1", "A200", "alice")).await.unwrap();

        let issues = OwnershipConflictResolver::new(&alice, &central)
            .detect("P-1", "alice")
            .await
            .unwrap();
        assert_eq!(
            issues,
            vec![OwnershipIssue {
                key: "A100".to_string(),
                central_owner: "bob".to_string(),
                local_count: 2,
            }]
        );
    }

    #[tokio::test]
    async fn test_resolve_reinserts_under_central_owner_and_converges() {
        let (alice, central) = testing::stores().await;
        let bob = testing::replica().await;

        // Alice pushes her copy first, then Bob claims the same key.
        let mine = alice
            .activities()
            .create(&new_activity("P-1", "A100", "alice"))
            .await
            .unwrap();
        PushEngine::new(&alice, &central).push(&p1()).await.unwrap();
        bob.activities().create(&new_activity("P-1", "A100", "bob")).await.unwrap();
        PushEngine::new(&bob, &central).push(&p1()).await.unwrap();

        let resolver = OwnershipConflictResolver::new(&alice, &central);
        let issues = resolver.detect("P-1", "alice").await.unwrap();
        assert_eq!(issues.len(), 1);

        let outcome = resolver.resolve("P-1", "alice", &issues).await.unwrap();
        assert_eq!(outcome.reassigned, 1);
        assert_eq!(outcome.push.inserted, 1);
        assert!(outcome.push.failed.is_empty());

        let (owner, description): (Option<String>, String) = sqlx::query_as(
            "SELECT assigned_to, description FROM activities WHERE unique_id = ?",
        )
        .bind(&mine.unique_id)
        .fetch_one(central.pool())
        .await
        .unwrap();
        assert_eq!(owner.as_deref(), Some("bob"));
        assert_eq!(description, mine.description);

        let row = alice.activities().get(&mine.unique_id).await.unwrap().unwrap();
        assert!(!row.local_dirty);
        assert!(resolver.detect("P-1", "alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_resolve_restores_central_row_on_next_push() {
        let (alice, central) = testing::stores().await;
        let bob = testing::replica().await;

        let mine = alice
            .activities()
            .create(&new_activity("P-1", "A100", "alice"))
            .await
            .unwrap();
        PushEngine::new(&alice, &central).push(&p1()).await.unwrap();
        bob.activities().create(&new_activity("P-1", "A100", "bob")).await.unwrap();
        PushEngine::new(&bob, &central).push(&p1()).await.unwrap();

        let resolver = OwnershipConflictResolver::new(&alice, &central);
        let issues = resolver.detect("P-1", "alice").await.unwrap();

        // Stop after the central delete, before the local reassignment
        let reassignments = vec![(mine.unique_id.clone(), "bob".to_string())];
        resolver.mark_pending("alice", &reassignments).await.unwrap();
        resolver
            .delete_stale_central_rows("alice", &reassignments)
            .await
            .unwrap();

        let row = alice.activities().get(&mine.unique_id).await.unwrap().unwrap();
        assert!(row.local_dirty);

        let push = PushEngine::new(&alice, &central).push(&p1()).await.unwrap();
        assert_eq!(push.inserted, 1);

        // The split is still visible, so a fresh resolve converges
        assert_eq!(resolver.detect("P-1", "alice").await.unwrap(), issues);
        let outcome = resolver.resolve("P-1", "alice", &issues).await.unwrap();
        assert_eq!(outcome.reassigned, 1);
        assert!(resolver.detect("P-1", "alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_unblocks_rejected_update() {
        let (alice, central) = testing::stores().await;
        let mine = alice
            .activities()
            .create(&new_activity("P-1", "A100", "alice"))
            .await
            .unwrap();
        PushEngine::new(&alice, &central).push(&p1()).await.unwrap();

        sqlx::query("UPDATE activities SET assigned_to = 'bob' WHERE unique_id = ?")
            .bind(&mine.unique_id)
            .execute(central.pool())
            .await
            .unwrap();
        sqlx::query("UPDATE activities SET local_dirty = 1, remarks = 'edited' WHERE unique_id = ?")
            .bind(&mine.unique_id)
            .execute(alice.pool())
            .await
            .unwrap();

        let push = PushEngine::new(&alice, &central).push(&p1()).await.unwrap();
        assert_eq!(push.failed[0].reason, REASON_NOT_ASSIGNED);

        let resolver = OwnershipConflictResolver::new(&alice, &central);
        let issues = resolver.detect("P-1", "alice").await.unwrap();
        let outcome = resolver.resolve("P-1", "alice", &issues).await.unwrap();

        assert_eq!(outcome.reassigned, 1);
        assert_eq!(outcome.push.updated, 1);

        let remarks: (Option<String>,) =
            sqlx::query_as("SELECT remarks FROM activities WHERE unique_id = ?")
                .bind(&mine.unique_id)
                .fetch_one(central.pool())
                .await
                .unwrap();
        assert_eq!(remarks.0.as_deref(), Some("edited"));
    }

    #[tokio::test]
    async fn test_resolve_with_no_matching_records() {
        let (local, central) = testing::stores().await;
        let issues = vec![OwnershipIssue {
            key: "Z999".to_string(),
            central_owner: "bob".to_string(),
            local_count: 1,
        }];

        let outcome = OwnershipConflictResolver::new(&local, &central)
            .resolve("P-1", "alice", &issues)
            .await
            .unwrap();
        assert_eq!(outcome.reassigned, 0);
    }
}
