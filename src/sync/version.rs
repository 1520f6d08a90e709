//! Central write ordering
//!
//! Every accepted central write takes its `sync_version` from the single-row
//! `sync_version_counter`. The increment and the read share one transaction,
//! so the database's write lock on the counter row serializes concurrent
//! callers across processes.

use sqlx::{Connection, SqliteConnection, SqlitePool};

/// Issues strictly increasing central versions
pub struct VersionAuthority;

impl VersionAuthority {
    /// Take the next version.
    ///
    /// When `conn` is already inside a transaction this runs in a savepoint,
    /// so rolling back the caller's write also returns the version.
    pub async fn next_version(conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
        let mut tx = conn.begin().await?;

        sqlx::query("UPDATE sync_version_counter SET value = value + 1 WHERE id = 1")
            .execute(&mut *tx)
            .await?;

        let version: i64 = sqlx::query_scalar("SELECT value FROM sync_version_counter WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(version)
    }

    /// Highest version issued so far
    pub async fn current(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT value FROM sync_version_counter WHERE id = 1")
            .fetch_one(pool)
            .await
    }
}
