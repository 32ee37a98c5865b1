//! SQLite storage for the ledger.
//!
//! Opening a [`Database`] creates the file when missing, switches it to WAL
//! so readers never block the acquisition workers, and applies the embedded
//! migrations.
//!
//! ```no_run
//! use bookfetch_core::{Database, Ledger};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = Ledger::new(Database::new(Path::new("ledger.db")).await?);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::instrument;

use crate::ledger::LedgerDbErrorKind;

/// SQLite serializes writers on a file lock, so a small pool is enough.
const MAX_CONNECTIONS: u32 = 5;

/// How long a writer waits for the file lock before `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to open ledger database: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("failed to apply ledger schema: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    /// True when another connection held the database lock past the busy timeout.
    #[must_use]
    pub fn is_busy_or_locked(&self) -> bool {
        let sqlx_error = match self {
            Self::Connection(error) => error,
            Self::Migration(sqlx::migrate::MigrateError::Execute(error)) => error,
            Self::Migration(_) => return false,
        };
        LedgerDbErrorKind::from_sqlx(sqlx_error) == LedgerDbErrorKind::BusyOrLocked
    }
}

/// Pooled handle to the ledger database. Clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the database file at `db_path`, creating and migrating it as needed.
    ///
    /// # Errors
    ///
    /// [`DbError::Connection`] when the file cannot be opened,
    /// [`DbError::Migration`] when the schema cannot be applied.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let connect = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(connect)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database on a single connection. Used by tests.
    ///
    /// # Errors
    ///
    /// Same as [`Database::new`].
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Whether the journal mode is WAL.
    ///
    /// # Errors
    ///
    /// [`DbError::Connection`] when the pragma query fails.
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode.eq_ignore_ascii_case("wal"))
    }

    /// Waits for in-flight queries and closes every connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const INSERT_MINIMAL: &str = "INSERT INTO ledger (cross_source_key, title, author, author_key, source) \
         VALUES ('mark twain::tom sawyer', 'Tom Sawyer', 'Mark Twain', 'mark twain', 'gutenberg')";

    #[test]
    fn test_only_lock_failures_count_as_busy() {
        assert!(!DbError::Connection(sqlx::Error::PoolTimedOut).is_busy_or_locked());
        assert!(!DbError::Connection(sqlx::Error::PoolClosed).is_busy_or_locked());
    }

    #[tokio::test]
    async fn test_in_memory_has_ledger_table() {
        let db = Database::new_in_memory().await.unwrap();
        sqlx::query(INSERT_MINIMAL).execute(db.pool()).await.unwrap();

        let (state,): (String,) = sqlx::query_as("SELECT download_state FROM ledger")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(state, "not_attempted");
    }

    #[tokio::test]
    async fn test_unknown_state_rejected() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO ledger (cross_source_key, title, author, author_key, source, download_state) \
             VALUES ('k', 'T', 'A', 'a', 'gutenberg', 'exploded')",
        )
        .execute(db.pool())
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_file_database_uses_wal_and_persists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested.db");

        let db = Database::new(&db_path).await.unwrap();
        assert!(db.is_wal_enabled().await.unwrap());
        sqlx::query(INSERT_MINIMAL).execute(db.pool()).await.unwrap();
        db.close().await;

        let reopened = Database::new(&db_path).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ledger")
            .fetch_one(reopened.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
