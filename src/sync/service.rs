//! Caller-facing sync API
//!
//! Wraps the engines behind one handle that can be cloned into request
//! handlers and the periodic sync task.

use crate::config::SyncSettings;
use crate::db::{read_schema_version, CentralStore, LocalStore};
use crate::error::{Result, SyncError};

use super::conflict::OwnershipConflictResolver;
use super::pull::PullEngine;
use super::push::PushEngine;
use super::store::CursorStore;
use super::types::{
    OwnershipIssue, PullReport, PushReport, ResolveResponse, SyncCycleReport, SyncStatus,
};

#[derive(Clone)]
pub struct SyncService {
    local: LocalStore,
    central: CentralStore,
    settings: SyncSettings,
}

impl SyncService {
    pub fn new(local: LocalStore, central: CentralStore, settings: SyncSettings) -> Self {
        Self {
            local,
            central,
            settings,
        }
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn central(&self) -> &CentralStore {
        &self.central
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub async fn push(&self, projects: &[String]) -> Result<PushReport> {
        PushEngine::new(&self.local, &self.central)
            .with_batch_size(self.settings.batch_size)
            .push(projects)
            .await
    }

    pub async fn pull(&self, projects: &[String], exclude: &[String]) -> Result<PullReport> {
        PullEngine::new(&self.local, &self.central)
            .pull(projects, exclude)
            .await
    }

    pub async fn detect_conflicts(&self, project_id: &str, user: &str) -> Result<Vec<OwnershipIssue>> {
        self.resolver().detect(project_id, user).await
    }

    /// Reassign to the central owners and re-push the project
    pub async fn resolve_conflicts(
        &self,
        project_id: &str,
        user: &str,
        issues: &[OwnershipIssue],
    ) -> Result<ResolveResponse> {
        self.resolver().resolve(project_id, user, issues).await
    }

    fn resolver(&self) -> OwnershipConflictResolver<'_> {
        OwnershipConflictResolver::new(&self.local, &self.central)
            .with_batch_size(self.settings.batch_size)
    }

    /// One sync cycle: push, handle ownership rejections, then pull
    /// everything except the writes this cycle made. Records the push left
    /// dirty (rejected or failed) keep their local edits through the pull.
    pub async fn run_cycle(&self, projects: &[String]) -> Result<SyncCycleReport> {
        let mut report = SyncCycleReport::default();
        if projects.is_empty() {
            return Ok(report);
        }

        self.central.ping().await?;

        report.push = self.push(projects).await?;

        if report.push.has_ownership_rejections() {
            let user = self.settings.user.as_str();
            for project_id in projects {
                let issues = self.detect_conflicts(project_id, user).await?;
                if issues.is_empty() {
                    continue;
                }

                if self.settings.auto_resolve_conflicts {
                    let resolved = self.resolve_conflicts(project_id, user, &issues).await?;
                    report.reassigned += resolved.reassigned;
                    report.push.merge(resolved.push);
                } else {
                    report.conflicts.insert(project_id.clone(), issues);
                }
            }
        }

        report.pull = PullEngine::new(&self.local, &self.central)
            .pull_after_push(projects, &report.push.pushed)
            .await?;

        tracing::info!(
            pushed = report.push.pushed.len(),
            failed = report.push.failed.len(),
            pulled = report.pull.pulled,
            conflicts = report.conflicts.values().map(Vec::len).sum::<usize>(),
            reassigned = report.reassigned,
            "Sync cycle complete"
        );
        Ok(report)
    }

    pub async fn status(&self, project_id: &str) -> Result<SyncStatus> {
        let cursors = CursorStore::new(self.local.pool());

        Ok(SyncStatus {
            project_id: project_id.to_string(),
            pending_changes: self.local.activities().count_dirty(project_id).await?,
            last_pulled_sync_version: cursors.get(project_id).await?,
            last_pulled_at: cursors.last_advanced_at(project_id).await?,
            schema_version: read_schema_version(self.local.pool())
                .await
                .map_err(SyncError::local)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{testing, ActivityEdit, NewActivity};

    fn settings(user: &str, auto_resolve: bool) -> SyncSettings {
        SyncSettings {
            user: user.to_string(),
            auto_resolve_conflicts: auto_resolve,
            ..Default::default()
        }
    }

    fn p1() -> Vec<String> {
        vec!["P-1".to_string()]
    }

    async fn reassign_centrally(central: &CentralStore, unique_id: &str, owner: &str) {
        let mut conn = central.pool().acquire().await.unwrap();
        let version = crate::sync::VersionAuthority::next_version(&mut conn)
            .await
            .unwrap();
        sqlx::query("UPDATE activities SET assigned_to = ?, sync_version = ? WHERE unique_id = ?")
            .bind(owner)
            .bind(version)
            .bind(unique_id)
            .execute(&mut *conn)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cycle_pushes_then_pulls_others() {
        let (alice_local, central) = testing::stores().await;
        let bob_local = testing::replica().await;
        let alice = SyncService::new(alice_local, central.clone(), settings("alice", false));
        let bob = SyncService::new(bob_local, central, settings("bob", false));

        alice
            .local()
            .activities()
            .create(&NewActivity {
                project_id: "P-1".to_string(),
                activity_no: Some("A100".to_string()),
                assigned_to: Some("alice".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let first = alice.run_cycle(&p1()).await.unwrap();
        assert_eq!(first.push.inserted, 1);
        assert_eq!(first.pull.pulled, 0);

        let second = bob.run_cycle(&p1()).await.unwrap();
        assert_eq!(second.push.inserted, 0);
        assert_eq!(second.pull.pulled, 1);

        let status = bob.status("P-1").await.unwrap();
        assert_eq!(status.pending_changes, 0);
        assert_eq!(status.last_pulled_sync_version, 1);
        assert!(status.last_pulled_at.is_some());
        assert_eq!(status.schema_version, crate::db::TARGET_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_cycle_reports_conflicts_without_auto_resolve() {
        let (local, central) = testing::stores().await;
        let alice = SyncService::new(local, central.clone(), settings("alice", false));

        let created = alice
            .local()
            .activities()
            .create(&NewActivity {
                project_id: "P-1".to_string(),
                activity_no: Some("A100".to_string()),
                assigned_to: Some("alice".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        alice.run_cycle(&p1()).await.unwrap();

        reassign_centrally(&central, &created.unique_id, "bob").await;
        alice
            .local()
            .activities()
            .update(&created.unique_id, &ActivityEdit {
                remarks: Some("alice's note".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let report = alice.run_cycle(&p1()).await.unwrap();
        assert_eq!(report.push.updated, 0);
        assert!(report.push.has_ownership_rejections());
        assert_eq!(report.conflicts["P-1"][0].central_owner, "bob");
        assert_eq!(report.reassigned, 0);

        // The rejected edit survives the cycle's pull, still dirty and still ours
        let row = alice.local().activities().get(&created.unique_id).await.unwrap().unwrap();
        assert!(row.local_dirty);
        assert_eq!(row.remarks.as_deref(), Some("alice's note"));
        assert_eq!(row.assigned_to.as_deref(), Some("alice"));

        // So the reported issues can still be resolved
        let resolved = alice
            .resolve_conflicts("P-1", "alice", &report.conflicts["P-1"])
            .await
            .unwrap();
        assert_eq!(resolved.reassigned, 1);
        assert_eq!(resolved.push.updated, 1);

        let (owner, remarks): (Option<String>, Option<String>) =
            sqlx::query_as("SELECT assigned_to, remarks FROM activities WHERE unique_id = ?")
                .bind(&created.unique_id)
                .fetch_one(central.pool())
                .await
                .unwrap();
        assert_eq!(owner.as_deref(), Some("bob"));
        assert_eq!(remarks.as_deref(), Some("alice's note"));
    }

    #[tokio::test]
    async fn test_cycle_auto_resolves_conflicts() {
        let (local, central) = testing::stores().await;
        let alice = SyncService::new(local, central.clone(), settings("alice", true));

        let created = alice
            .local()
            .activities()
            .create(&NewActivity {
                project_id: "P-1".to_string(),
                activity_no: Some("A100".to_string()),
                assigned_to: Some("alice".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        alice.run_cycle(&p1()).await.unwrap();

        reassign_centrally(&central, &created.unique_id, "bob").await;
        alice
            .local()
            .activities()
            .update(&created.unique_id, &ActivityEdit {
                remarks: Some("alice's note".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let report = alice.run_cycle(&p1()).await.unwrap();
        assert_eq!(report.reassigned, 1);
        assert_eq!(report.push.updated, 1);
        assert!(report.push.failed.is_empty());
        assert!(report.conflicts.is_empty());
        assert!(alice.detect_conflicts("P-1", "alice").await.unwrap().is_empty());

        let row = alice.local().activities().get(&created.unique_id).await.unwrap().unwrap();
        assert_eq!(row.assigned_to.as_deref(), Some("bob"));
        assert_eq!(row.remarks.as_deref(), Some("alice's note"));
        assert!(!row.local_dirty);
    }

    #[tokio::test]
    async fn test_empty_cycle_touches_nothing() {
        let (local, central) = testing::stores().await;
        let service = SyncService::new(local, central, settings("alice", false));
        let report = service.run_cycle(&[]).await.unwrap();
        assert_eq!(report.pull.pulled, 0);
        assert!(report.push.pushed.is_empty());
    }
}
