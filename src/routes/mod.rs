//! Route modules for the activity sync control API

pub mod activities;
pub mod health;
pub mod sync;

use axum::{routing::get, Router};

use crate::state::AppState;

/// Build the API router with its state attached
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .nest("/api/v1/sync", sync::router())
        .nest("/api/v1/activities", activities::router())
        .with_state(state)
}
