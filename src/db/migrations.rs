//! Versioned migration of the local store schema
//!
//! The local schema version is an integer in `app_settings` under
//! [`SCHEMA_VERSION_KEY`]. Startup walks it forward one step at a time up to
//! [`TARGET_SCHEMA_VERSION`]. Each step checks existing state before it
//! alters anything, so re-running a step whose version write was lost is
//! harmless. A step and its version write commit in the same transaction.

use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;

/// Schema version this binary expects
pub const TARGET_SCHEMA_VERSION: i64 = 5;

/// `app_settings` key holding the applied schema version
pub const SCHEMA_VERSION_KEY: &str = "SchemaVersion";

/// Migration failure
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Failed to read local schema version: {0}")]
    ReadVersion(#[source] sqlx::Error),

    #[error("Migration to schema version {version} ({name}) failed: {source}")]
    Failed {
        version: i64,
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl MigrationError {
    /// The schema version whose migration failed, if any
    pub fn version(&self) -> Option<i64> {
        match self {
            MigrationError::Failed { version, .. } => Some(*version),
            MigrationError::ReadVersion(_) => None,
        }
    }
}

/// Result of a migration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Nothing to do
    UpToDate { version: i64 },
    /// Steps `from + 1 ..= to` were applied
    Migrated { from: i64, to: i64 },
    /// The local schema is newer than this binary; nothing was touched
    DowngradeSkipped { local: i64, target: i64 },
}

/// One registered schema step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStep {
    CreateBaseTables,
    AddSyncColumns,
    CreateSyncCursors,
    AddRemarksAndOwnershipIndex,
    MarkUnpushedDirty,
}

impl MigrationStep {
    /// Registered steps, ordered by version
    pub const ALL: [MigrationStep; TARGET_SCHEMA_VERSION as usize] = [
        MigrationStep::CreateBaseTables,
        MigrationStep::AddSyncColumns,
        MigrationStep::CreateSyncCursors,
        MigrationStep::AddRemarksAndOwnershipIndex,
        MigrationStep::MarkUnpushedDirty,
    ];

    pub fn version(self) -> i64 {
        match self {
            MigrationStep::CreateBaseTables => 1,
            MigrationStep::AddSyncColumns => 2,
            MigrationStep::CreateSyncCursors => 3,
            MigrationStep::AddRemarksAndOwnershipIndex => 4,
            MigrationStep::MarkUnpushedDirty => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MigrationStep::CreateBaseTables => "create_base_tables",
            MigrationStep::AddSyncColumns => "add_sync_columns",
            MigrationStep::CreateSyncCursors => "create_sync_cursors",
            MigrationStep::AddRemarksAndOwnershipIndex => "add_remarks_and_ownership_index",
            MigrationStep::MarkUnpushedDirty => "mark_unpushed_dirty",
        }
    }

    pub fn for_version(version: i64) -> Option<MigrationStep> {
        Self::ALL.into_iter().find(|step| step.version() == version)
    }

    /// Apply this step. Safe to call again on a store it already ran on.
    pub async fn apply(self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        match self {
            MigrationStep::CreateBaseTables => {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS activities (
                        unique_id TEXT PRIMARY KEY,
                        project_id TEXT NOT NULL,
                        activity_no TEXT,
                        description TEXT NOT NULL DEFAULT '',
                        assigned_to TEXT,
                        status TEXT NOT NULL DEFAULT 'not_started',
                        percent_complete REAL NOT NULL DEFAULT 0,
                        planned_start TEXT,
                        planned_finish TEXT,
                        modified_at TEXT NOT NULL
                    )
                    "#,
                )
                .execute(&mut *conn)
                .await?;
            }
            MigrationStep::AddSyncColumns => {
                add_column_if_missing(conn, "activities", "record_id", "INTEGER").await?;
                add_column_if_missing(
                    conn,
                    "activities",
                    "local_dirty",
                    "INTEGER NOT NULL DEFAULT 1",
                )
                .await?;
                add_column_if_missing(
                    conn,
                    "activities",
                    "sync_version",
                    "INTEGER NOT NULL DEFAULT 0",
                )
                .await?;
            }
            MigrationStep::CreateSyncCursors => {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS sync_cursors (
                        project_id TEXT PRIMARY KEY,
                        last_pulled_sync_version INTEGER NOT NULL DEFAULT 0,
                        updated_at TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_activities_dirty ON activities(project_id, local_dirty);
                    "#,
                )
                .execute(&mut *conn)
                .await?;
            }
            MigrationStep::AddRemarksAndOwnershipIndex => {
                add_column_if_missing(conn, "activities", "remarks", "TEXT").await?;
                add_column_if_missing(conn, "activities", "modified_by", "TEXT").await?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_activities_owner_key ON activities(project_id, assigned_to, activity_no)",
                )
                .execute(&mut *conn)
                .await?;
            }
            MigrationStep::MarkUnpushedDirty => {
                sqlx::query(
                    "UPDATE activities SET local_dirty = 1 WHERE sync_version = 0 AND local_dirty = 0",
                )
                .execute(&mut *conn)
                .await?;
            }
        }

        Ok(())
    }
}

async fn column_exists(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
) -> Result<bool, sqlx::Error> {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(&mut *conn)
            .await?;

    Ok(row.0 > 0)
}

async fn add_column_if_missing(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<(), sqlx::Error> {
    if column_exists(conn, table, column).await? {
        return Ok(());
    }

    // Identifiers cannot be bound; every caller passes literals.
    let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition);
    sqlx::query(&sql).execute(&mut *conn).await?;
    Ok(())
}

/// Read the applied schema version (0 if never recorded)
pub async fn read_schema_version(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    read_version(&mut conn).await
}

async fn ensure_settings_table(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS app_settings (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
    )
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn read_version(conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    ensure_settings_table(conn).await?;

    let row: Option<(i64,)> =
        sqlx::query_as("SELECT CAST(value AS INTEGER) FROM app_settings WHERE key = ?")
            .bind(SCHEMA_VERSION_KEY)
            .fetch_optional(&mut *conn)
            .await?;

    Ok(row.map(|(v,)| v).unwrap_or(0))
}

async fn write_version(conn: &mut SqliteConnection, version: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO app_settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(SCHEMA_VERSION_KEY)
    .bind(version.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Brings the local store up to the schema version this binary expects
pub struct SchemaMigrator<'a> {
    pool: &'a SqlitePool,
    target: i64,
}

impl<'a> SchemaMigrator<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self {
            pool,
            target: TARGET_SCHEMA_VERSION,
        }
    }

    /// Stop at an earlier version than the compiled target
    pub fn with_target(mut self, target: i64) -> Self {
        self.target = target.min(TARGET_SCHEMA_VERSION);
        self
    }

    /// Run every pending step in order.
    ///
    /// On failure the store stays at the last completed version and the
    /// error names the version that failed.
    pub async fn run(&self) -> Result<MigrationOutcome, MigrationError> {
        let current = {
            let mut conn = self.pool.acquire().await.map_err(MigrationError::ReadVersion)?;
            read_version(&mut conn)
                .await
                .map_err(MigrationError::ReadVersion)?
        };

        if current > self.target {
            tracing::warn!(
                local = current,
                target = self.target,
                "Local schema is newer than this build; skipping migrations"
            );
            return Ok(MigrationOutcome::DowngradeSkipped {
                local: current,
                target: self.target,
            });
        }

        if current == self.target {
            tracing::debug!(version = current, "Local schema up to date");
            return Ok(MigrationOutcome::UpToDate { version: current });
        }

        for version in (current + 1)..=self.target {
            let Some(step) = MigrationStep::for_version(version) else {
                continue;
            };
            self.apply_step(step).await?;
            tracing::info!(version, name = step.name(), "Applied schema migration");
        }

        Ok(MigrationOutcome::Migrated {
            from: current,
            to: self.target,
        })
    }

    async fn apply_step(&self, step: MigrationStep) -> Result<(), MigrationError> {
        let failed = |source| MigrationError::Failed {
            version: step.version(),
            name: step.name(),
            source,
        };

        let mut tx = self.pool.begin().await.map_err(failed)?;
        step.apply(&mut tx).await.map_err(failed)?;
        write_version(&mut tx, step.version()).await.map_err(failed)?;
        tx.commit().await.map_err(failed)?;
        Ok(())
    }
}
