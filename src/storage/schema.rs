use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{Collection, StorageError};

/// Current schema version.
///
/// - 1: `sync_queue`
/// - 2: `saved_stories`, `cached_stories`
pub const SCHEMA_VERSION: i64 = 2;

// ============================================================================
// Database
// ============================================================================

/// Handle to the durable local store.
///
/// Cloning is cheap (shared pool). Several processes may open the same file;
/// the foreground CLI and the background `watch` worker coordinate only
/// through the atomic operations of this store.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open the store, creating any missing collections.
    ///
    /// Opening is idempotent: existing collections and their records are never
    /// dropped or rewritten.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` if the file cannot be opened and
    /// `StorageError::Migration` if the schema cannot be brought up to date
    /// (including a database written by a newer version of this program).
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        Self::open_at_version(path, SCHEMA_VERSION).await
    }

    pub(crate) async fn open_at_version(path: &str, version: i64) -> Result<Self, StorageError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        // The queue holds bearer tokens: create the file user-only before SQLite does.
        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::PermissionsExt;
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    tracing::warn!(path = %path, error = %e, "Failed to set database file permissions");
                }
            } else if let Some(parent) = db_path.parent() {
                if parent.exists() {
                    use std::os::unix::fs::OpenOptionsExt;
                    let _file = std::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(0o600)
                        .open(db_path)
                        .ok(); // If creation fails, SQLite will report the error at connect_with.
                }
            }
        }

        // busy_timeout: a drain in another process holds the write lock only briefly.
        let mut options = SqliteConnectOptions::from_str(&url)?.pragma("busy_timeout", "5000");
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to ":memory:" is a separate database, so keep exactly one.
        let max_connections = if in_memory { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate(version).await.map_err(|e| match e {
            StorageError::Unavailable(err) => StorageError::Migration(err.to_string()),
            other => other,
        })?;
        Ok(db)
    }

    /// Bring the schema up to `target`.
    ///
    /// Runs in one transaction. Collections introduced at or below `target`
    /// are created when missing; nothing is ever dropped.
    async fn migrate(&self, target: i64) -> Result<(), StorageError> {
        let (current,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;

        if current > target {
            return Err(StorageError::Migration(format!(
                "database schema version {current} is newer than supported version {target}"
            )));
        }

        let mut tx = self.pool.begin().await?;

        for collection in Collection::ALL
            .iter()
            .filter(|c| c.introduced_in() <= target)
        {
            let sql = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    key TEXT NOT NULL UNIQUE,
                    value BLOB NOT NULL
                )
            "#,
                collection.table()
            );
            sqlx::query(&sql).execute(&mut *tx).await?;
        }

        if current < target {
            // PRAGMA does not accept bound parameters; target is an internal constant.
            sqlx::query(&format!("PRAGMA user_version = {target}"))
                .execute(&mut *tx)
                .await?;
            tracing::info!(from = current, to = target, "Upgraded local schema");
        }

        tx.commit().await?;

        Ok(())
    }

    /// Close every pooled connection, checkpointing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Schema version recorded in the database file.
    pub async fn schema_version(&self) -> Result<i64, StorageError> {
        let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }
}
