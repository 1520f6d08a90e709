//! Database module for the local replica and the central store
//!
//! Both stores are SQLite databases reached through sqlx pools. The local
//! schema is owned by [`SchemaMigrator`]; the central schema is created on
//! open if it is missing.

mod activities;
mod migrations;
mod schema;

pub use activities::*;
pub use migrations::*;
pub use schema::*;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, SyncError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

async fn file_pool(database_url: &str) -> std::result::Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// In-memory databases live as long as their connection, so the pool keeps
/// exactly one connection open for its whole lifetime.
async fn memory_pool() -> std::result::Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
}

/// Handle to the embedded local replica
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    /// Open (creating if needed) the local store. Schema migration is a
    /// separate step, see [`SchemaMigrator`].
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = file_pool(database_url).await.map_err(SyncError::local)?;
        Ok(Self { pool })
    }

    pub async fn open_in_memory() -> Result<Self> {
        let pool = memory_pool().await.map_err(SyncError::local)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn activities(&self) -> ActivityRepository<'_> {
        ActivityRepository::new(&self.pool)
    }
}

/// Handle to the shared central store
#[derive(Clone)]
pub struct CentralStore {
    pool: SqlitePool,
}

impl CentralStore {
    /// Connect to the central store and make sure its schema exists
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = file_pool(database_url).await.map_err(SyncError::central)?;
        initialize_central_schema(&pool)
            .await
            .map_err(SyncError::central)?;
        Ok(Self { pool })
    }

    pub async fn open_in_memory() -> Result<Self> {
        let pool = memory_pool().await.map_err(SyncError::central)?;
        initialize_central_schema(&pool)
            .await
            .map_err(SyncError::central)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Round-trip check used before a sync cycle touches anything
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(SyncError::central)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Fully migrated in-memory local store plus an empty central store
    pub async fn stores() -> (LocalStore, CentralStore) {
        let local = LocalStore::open_in_memory().await.unwrap();
        SchemaMigrator::new(local.pool()).run().await.unwrap();
        let central = CentralStore::open_in_memory().await.unwrap();
        (local, central)
    }

    pub async fn replica() -> LocalStore {
        let local = LocalStore::open_in_memory().await.unwrap();
        SchemaMigrator::new(local.pool()).run().await.unwrap();
        local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_central_open_is_idempotent() {
        let central = CentralStore::open_in_memory().await.unwrap();
        initialize_central_schema(central.pool()).await.unwrap();

        let counters: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_version_counter")
            .fetch_one(central.pool())
            .await
            .unwrap();
        assert_eq!(counters.0, 1);
        central.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_stores_open() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("central.db").display());

        let central = CentralStore::open(&url).await.unwrap();
        central.ping().await.unwrap();

        let local_url = format!("sqlite:{}", dir.path().join("local.db").display());
        let local = LocalStore::open(&local_url).await.unwrap();
        SchemaMigrator::new(local.pool()).run().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_central_path_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!(
            "sqlite:{}",
            dir.path().join("missing-share").join("sub").join("central.db").display()
        );

        let err = match CentralStore::open(&url).await {
            Ok(_) => panic!("opened a store under a missing directory"),
            Err(e) => e,
        };
        assert!(err.is_unavailable(), "unexpected error: {err}");
        assert!(matches!(err, SyncError::CentralUnavailable(_)));
    }
}
