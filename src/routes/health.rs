//! Health check endpoints

use axum::{extract::State, Json};
use serde::Serialize;

use crate::db::read_schema_version;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
    #[serde(rename = "schemaVersion")]
    pub schema_version: Option<i64>,
    #[serde(rename = "centralReachable")]
    pub central_reachable: bool,
}

/// Liveness plus a quick look at both stores.
///
/// Always answers 200; an unreachable central store only marks the replica
/// as degraded since local edits keep working offline.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let schema_version = read_schema_version(state.local().pool()).await.ok();
    let central_reachable = state.sync().central().ping().await.is_ok();

    Json(HealthResponse {
        status: if central_reachable && schema_version.is_some() {
            "healthy"
        } else {
            "degraded"
        },
        version: env!("CARGO_PKG_VERSION"),
        service: "activity-sync",
        schema_version,
        central_reachable,
    })
}
