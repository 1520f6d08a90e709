//! Activity API routes
//!
//! Local edits only; every write marks the record dirty for the next push.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::db::{Activity, ActivityEdit, NewActivity};
use crate::error::{Result, SyncError};
use crate::state::AppState;

/// Create the activities router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_activity))
        .route("/project/:project_id", get(list_project_activities))
        .route("/:unique_id", get(get_activity).put(update_activity))
}

async fn list_project_activities(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<Activity>>> {
    let activities = state.local().activities().list_by_project(&project_id).await?;
    Ok(Json(activities))
}

async fn create_activity(
    State(state): State<AppState>,
    Json(data): Json<NewActivity>,
) -> Result<(StatusCode, Json<Activity>)> {
    let activity = state.local().activities().create(&data).await?;
    Ok((StatusCode::CREATED, Json(activity)))
}

async fn get_activity(
    State(state): State<AppState>,
    Path(unique_id): Path<String>,
) -> Result<Json<Activity>> {
    state
        .local()
        .activities()
        .get(&unique_id)
        .await?
        .map(Json)
        .ok_or_else(|| SyncError::NotFound(format!("Activity not found: {}", unique_id)))
}

async fn update_activity(
    State(state): State<AppState>,
    Path(unique_id): Path<String>,
    Json(edit): Json<ActivityEdit>,
) -> Result<Json<Activity>> {
    let activity = state.local().activities().update(&unique_id, &edit).await?;
    Ok(Json(activity))
}
