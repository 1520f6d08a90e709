//! Central store schema initialization

use sqlx::SqlitePool;

/// Create the central tables and seed the version counter if missing
pub async fn initialize_central_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(CENTRAL_SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

const CENTRAL_SCHEMA_SQL: &str = r#"
-- Authoritative activity rows; record_id is the central surrogate key
CREATE TABLE IF NOT EXISTS activities (
    record_id INTEGER PRIMARY KEY AUTOINCREMENT,
    unique_id TEXT NOT NULL UNIQUE,
    project_id TEXT NOT NULL,
    activity_no TEXT,
    description TEXT NOT NULL DEFAULT '',
    assigned_to TEXT,
    status TEXT NOT NULL DEFAULT 'not_started',
    percent_complete REAL NOT NULL DEFAULT 0,
    planned_start TEXT,
    planned_finish TEXT,
    remarks TEXT,
    modified_by TEXT,
    modified_at TEXT NOT NULL,
    sync_version INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_central_project_version ON activities(project_id, sync_version);
CREATE INDEX IF NOT EXISTS idx_central_project_key ON activities(project_id, activity_no);

-- Single-row global write counter
CREATE TABLE IF NOT EXISTS sync_version_counter (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    value INTEGER NOT NULL
);

INSERT OR IGNORE INTO sync_version_counter (id, value) VALUES (1, 0);
"#;
