//! Sync data types
//!
//! Reports returned by push, pull and conflict handling, plus the request
//! bodies of the control API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reason recorded when the central owner differs from the local owner
pub const REASON_NOT_ASSIGNED: &str = "no longer assigned to you";

/// Reason recorded when an update target vanished centrally mid-push
pub const REASON_MISSING_CENTRALLY: &str = "no longer exists in the central store";

/// A record that could not be pushed, with a human-readable reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushFailure {
    #[serde(rename = "uniqueId")]
    pub unique_id: String,
    pub reason: String,
}

impl PushFailure {
    pub fn new(unique_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether the record was rejected by the ownership gate
    pub fn is_ownership_rejection(&self) -> bool {
        self.reason == REASON_NOT_ASSIGNED
    }
}

impl fmt::Display for PushFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.unique_id, self.reason)
    }
}

/// Central identity assigned to a successfully pushed record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PushedRecord {
    #[serde(rename = "uniqueId")]
    pub unique_id: String,
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(rename = "recordId")]
    pub record_id: i64,
    #[serde(rename = "syncVersion")]
    pub sync_version: i64,
}

/// Outcome of a push
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushReport {
    pub inserted: usize,
    pub updated: usize,
    pub failed: Vec<PushFailure>,
    pub pushed: Vec<PushedRecord>,
}

impl PushReport {
    /// Unique ids written centrally; the exclusion list for the next pull
    pub fn pushed_ids(&self) -> Vec<String> {
        self.pushed.iter().map(|p| p.unique_id.clone()).collect()
    }

    pub fn has_ownership_rejections(&self) -> bool {
        self.failed.iter().any(PushFailure::is_ownership_rejection)
    }

    pub fn merge(&mut self, other: PushReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.failed.extend(other.failed);
        self.pushed.extend(other.pushed);

        // A later push in the same cycle may have written a record that an
        // earlier one rejected.
        let pushed = &self.pushed;
        self.failed
            .retain(|f| !pushed.iter().any(|p| p.unique_id == f.unique_id));
    }
}

/// Outcome of a pull
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullReport {
    pub pulled: usize,
    /// Cursor value per scope after the pull
    pub cursors: Vec<ProjectCursor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCursor {
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(rename = "lastPulledSyncVersion")]
    pub last_pulled_sync_version: i64,
}

/// Split ownership of one ownership key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipIssue {
    /// The shared ownership key (activity number)
    pub key: String,
    /// Owner the central store holds for the key
    #[serde(rename = "centralOwner")]
    pub central_owner: String,
    /// Local records for the key still owned by the local user
    #[serde(rename = "localCount")]
    pub local_count: i64,
}

/// Outcome of a full sync cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncCycleReport {
    pub push: PushReport,
    pub pull: PullReport,
    /// Unresolved split ownership per project, found after ownership rejections
    pub conflicts: BTreeMap<String, Vec<OwnershipIssue>>,
    /// Records reassigned by automatic conflict resolution
    pub reassigned: usize,
}

/// Sync status for a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(rename = "pendingChanges")]
    pub pending_changes: i64,
    #[serde(rename = "lastPulledSyncVersion")]
    pub last_pulled_sync_version: i64,
    #[serde(rename = "lastPulledAt")]
    pub last_pulled_at: Option<DateTime<Utc>>,
    #[serde(rename = "schemaVersion")]
    pub schema_version: i64,
}

/// Request to push or run a cycle for some projects
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectsRequest {
    /// Empty means the configured projects
    #[serde(default)]
    pub projects: Vec<String>,
}

/// Request to pull changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub projects: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Request to resolve detected ownership conflicts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRequest {
    #[serde(default)]
    pub user: Option<String>,
    pub issues: Vec<OwnershipIssue>,
}

/// Response from conflict resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub reassigned: usize,
    pub push: PushReport,
}
