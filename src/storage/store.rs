use serde::{de::DeserializeOwned, Serialize};
use sqlx::{Executor, Sqlite, Transaction};

use super::schema::Database;
use super::types::{CachedStory, Collection, QueuedSubmission, StorageError, StoryRecord};

// ============================================================================
// Records
// ============================================================================

/// A value that can live in a named collection.
///
/// Records are stored as JSON and addressed by the string returned from
/// [`Record::key`].
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    fn key(&self) -> &str;
}

impl Record for StoryRecord {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Record for CachedStory {
    fn key(&self) -> &str {
        &self.story.id
    }
}

impl Record for QueuedSubmission {
    fn key(&self) -> &str {
        self.id()
    }
}

fn encode<R: Record>(collection: Collection, record: &R) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(record).map_err(|source| StorageError::Codec {
        collection: collection.table(),
        source,
    })
}

fn decode<R: Record>(collection: Collection, bytes: &[u8]) -> Result<R, StorageError> {
    serde_json::from_slice(bytes).map_err(|source| StorageError::Codec {
        collection: collection.table(),
        source,
    })
}

// ============================================================================
// Shared statements (pool or transaction)
// ============================================================================

async fn put_with<'e, E, R>(executor: E, collection: Collection, record: &R) -> Result<(), StorageError>
where
    E: Executor<'e, Database = Sqlite>,
    R: Record,
{
    let value = encode(collection, record)?;
    // Upsert keeps the original seq, so a replaced record keeps its position.
    let sql = format!(
        "INSERT INTO {} (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        collection.table()
    );
    sqlx::query(&sql)
        .bind(record.key())
        .bind(value)
        .execute(executor)
        .await?;
    Ok(())
}

async fn delete_with<'e, E>(executor: E, collection: Collection, key: &str) -> Result<bool, StorageError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("DELETE FROM {} WHERE key = ?", collection.table());
    let result = sqlx::query(&sql).bind(key).execute(executor).await?;
    Ok(result.rows_affected() > 0)
}

async fn clear_with<'e, E>(executor: E, collection: Collection) -> Result<u64, StorageError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("DELETE FROM {}", collection.table());
    let result = sqlx::query(&sql).execute(executor).await?;
    Ok(result.rows_affected())
}

// ============================================================================
// Collection Operations
// ============================================================================

impl Database {
    /// Insert or replace a record by key.
    pub async fn put<R: Record>(&self, collection: Collection, record: &R) -> Result<(), StorageError> {
        put_with(&self.pool, collection, record).await
    }

    /// Fetch a single record by key.
    pub async fn get<R: Record>(
        &self,
        collection: Collection,
        key: &str,
    ) -> Result<Option<R>, StorageError> {
        let sql = format!("SELECT value FROM {} WHERE key = ?", collection.table());
        let row: Option<(Vec<u8>,)> = sqlx::query_as(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(value,)| decode(collection, &value)).transpose()
    }

    /// Fetch every record in insertion order.
    pub async fn get_all<R: Record>(&self, collection: Collection) -> Result<Vec<R>, StorageError> {
        let sql = format!("SELECT value FROM {} ORDER BY seq", collection.table());
        let rows: Vec<(Vec<u8>,)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|(value,)| decode(collection, value))
            .collect()
    }

    /// Like [`Database::get_all`], but rows that no longer decode are logged
    /// and skipped instead of failing the whole read.
    ///
    /// Only errors from the store itself are returned.
    pub async fn get_all_lossy<R: Record>(
        &self,
        collection: Collection,
    ) -> Result<Vec<R>, StorageError> {
        let sql = format!("SELECT key, value FROM {} ORDER BY seq", collection.table());
        let rows: Vec<(String, Vec<u8>)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .filter_map(|(key, value)| match decode(collection, value) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(collection = %collection, key = %key, error = %e, "Skipping unreadable record");
                    None
                }
            })
            .collect())
    }

    /// Delete a record by key.
    ///
    /// Deleting a missing key is not an error; the return value tells whether
    /// anything was removed.
    pub async fn delete(&self, collection: Collection, key: &str) -> Result<bool, StorageError> {
        delete_with(&self.pool, collection, key).await
    }

    /// Remove every record from a collection, returning how many were removed.
    pub async fn clear(&self, collection: Collection) -> Result<u64, StorageError> {
        clear_with(&self.pool, collection).await
    }

    /// Number of records in a collection.
    pub async fn count(&self, collection: Collection) -> Result<i64, StorageError> {
        let sql = format!("SELECT COUNT(*) FROM {}", collection.table());
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// Whether a record with `key` exists.
    pub async fn contains(&self, collection: Collection, key: &str) -> Result<bool, StorageError> {
        let sql = format!("SELECT 1 FROM {} WHERE key = ?", collection.table());
        let row: Option<(i64,)> = sqlx::query_as(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Start an atomic multi-step write.
    ///
    /// Readers see either none or all of the steps. Dropping the transaction
    /// without calling [`StoreTransaction::commit`] rolls it back.
    pub async fn begin(&self) -> Result<StoreTransaction, StorageError> {
        Ok(StoreTransaction {
            tx: self.pool.begin().await?,
        })
    }
}

// ============================================================================
// Transactions
// ============================================================================

/// An open write transaction on the store.
pub struct StoreTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl StoreTransaction {
    pub async fn put<R: Record>(&mut self, collection: Collection, record: &R) -> Result<(), StorageError> {
        put_with(&mut *self.tx, collection, record).await
    }

    pub async fn delete(&mut self, collection: Collection, key: &str) -> Result<bool, StorageError> {
        delete_with(&mut *self.tx, collection, key).await
    }

    pub async fn clear(&mut self, collection: Collection) -> Result<u64, StorageError> {
        clear_with(&mut *self.tx, collection).await
    }

    pub async fn commit(self) -> Result<(), StorageError> {
        self.tx.commit().await?;
        Ok(())
    }
}
