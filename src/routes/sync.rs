//! Sync API endpoints
//!
//! Manual triggers for push, pull and full cycles, plus conflict handling.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::error::Result;
use crate::state::AppState;
use crate::sync::{
    OwnershipIssue, ProjectsRequest, PullReport, PullRequest, PushReport, ResolveRequest,
    ResolveResponse, SyncCycleReport, SyncStatus,
};

/// Create the sync router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/push", post(push_changes))
        .route("/pull", post(pull_changes))
        .route("/cycle", post(run_cycle))
        .route("/status/:project_id", get(get_sync_status))
        .route("/conflicts/:project_id", get(detect_conflicts))
        .route("/conflicts/:project_id/resolve", post(resolve_conflicts))
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user: Option<String>,
}

fn user_or_default(state: &AppState, user: Option<String>) -> String {
    user.unwrap_or_else(|| state.config().sync.user.clone())
}

fn projects_or_default(state: &AppState, projects: Vec<String>) -> Vec<String> {
    if projects.is_empty() {
        state.config().sync.projects.clone()
    } else {
        projects
    }
}

/// Push local changes to the central store
async fn push_changes(
    State(state): State<AppState>,
    Json(req): Json<ProjectsRequest>,
) -> Result<Json<PushReport>> {
    let projects = projects_or_default(&state, req.projects);
    let report = state.sync().push(&projects).await?;
    Ok(Json(report))
}

/// Pull central changes into the local replica
async fn pull_changes(
    State(state): State<AppState>,
    Json(req): Json<PullRequest>,
) -> Result<Json<PullReport>> {
    let projects = projects_or_default(&state, req.projects);
    let report = state.sync().pull(&projects, &req.exclude).await?;
    Ok(Json(report))
}

/// Run a full push, conflict check and pull
async fn run_cycle(
    State(state): State<AppState>,
    Json(req): Json<ProjectsRequest>,
) -> Result<Json<SyncCycleReport>> {
    let projects = projects_or_default(&state, req.projects);
    let report = state.sync().run_cycle(&projects).await?;
    Ok(Json(report))
}

/// Get sync status for a project
async fn get_sync_status(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<SyncStatus>> {
    let status = state.sync().status(&project_id).await?;
    Ok(Json(status))
}

async fn detect_conflicts(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<OwnershipIssue>>> {
    let user = user_or_default(&state, query.user);
    let issues = state.sync().detect_conflicts(&project_id, &user).await?;
    Ok(Json(issues))
}

/// Reassign conflicting records to their central owners and re-push
async fn resolve_conflicts(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>> {
    let user = user_or_default(&state, req.user);
    let outcome = state
        .sync()
        .resolve_conflicts(&project_id, &user, &req.issues)
        .await?;
    Ok(Json(outcome))
}
