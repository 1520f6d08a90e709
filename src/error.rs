//! Error types for activity sync

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::db::MigrationError;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, SyncError>;

/// Sync error type
///
/// Local and central failures are kept apart so callers can tell
/// "central store unreachable" from "nothing needed syncing".
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Local store unavailable: {0}")]
    LocalUnavailable(#[source] sqlx::Error),

    #[error("Central store unavailable: {0}")]
    CentralUnavailable(#[source] sqlx::Error),

    #[error("Local store error: {0}")]
    Local(#[source] sqlx::Error),

    #[error("Central store error: {0}")]
    Central(#[source] sqlx::Error),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl SyncError {
    /// Classify an error raised against the local store
    pub fn local(err: sqlx::Error) -> Self {
        if is_connectivity(&err) {
            SyncError::LocalUnavailable(err)
        } else {
            SyncError::Local(err)
        }
    }

    /// Classify an error raised against the central store
    pub fn central(err: sqlx::Error) -> Self {
        if is_connectivity(&err) {
            SyncError::CentralUnavailable(err)
        } else {
            SyncError::Central(err)
        }
    }

    /// Whether this error means a store could not be reached at all
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            SyncError::LocalUnavailable(_) | SyncError::CentralUnavailable(_)
        )
    }
}

/// SQLite primary result codes for a store that cannot be reached
/// (BUSY, IOERR, CANTOPEN). Extended codes carry these in the low byte.
const SQLITE_UNREACHABLE: [i32; 3] = [5, 10, 14];

fn is_connectivity(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| SQLITE_UNREACHABLE.contains(&(code & 0xff)))
            .unwrap_or(false),
        _ => false,
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            SyncError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            SyncError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            SyncError::CentralUnavailable(e) => {
                tracing::error!("Central store unavailable: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "central_unavailable",
                    "Central store is unreachable".to_string(),
                )
            }
            SyncError::LocalUnavailable(e) => {
                tracing::error!("Local store unavailable: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "local_unavailable",
                    "Local store is unreachable".to_string(),
                )
            }
            SyncError::Local(e) | SyncError::Central(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "Database error".to_string(),
                )
            }
            SyncError::Migration(e) => {
                tracing::error!("Migration error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "migration_error",
                    e.to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}
