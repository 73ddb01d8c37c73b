use std::path::Path;

use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx_sqlite_pool::{ConnectionPool, PoolConfig};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::capabilities::{self, Capabilities};
use crate::entry::{NewQuarantineEntry, QuarantineEntry};
use crate::{Error, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS quarantine (
   id INTEGER PRIMARY KEY AUTOINCREMENT,
   original_path TEXT NOT NULL,
   quarantine_path TEXT NOT NULL UNIQUE,
   threat_name TEXT NOT NULL,
   file_size INTEGER NOT NULL CHECK (file_size >= 0),
   file_hash TEXT NOT NULL,
   detected_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_quarantine_original_path ON quarantine (original_path);
CREATE INDEX IF NOT EXISTS idx_quarantine_detected_at ON quarantine (detected_at);
"#;

const COLUMNS: &str =
   "id, original_path, quarantine_path, threat_name, file_size, file_hash, detected_at";

/// Quarantine metadata store backed by a [`ConnectionPool`].
///
/// Writes run inside pooled transactions; reads borrow a connection without
/// opening one.
#[derive(Debug, Clone)]
pub struct QuarantineStore {
   pool: ConnectionPool,
   capabilities: Capabilities,
}

impl QuarantineStore {
   /// Open (creating if needed) the quarantine database at `path`.
   pub async fn open(path: impl AsRef<Path>, custom_config: Option<PoolConfig>) -> Result<Self> {
      let pool = ConnectionPool::new(path, custom_config)?;
      let capabilities = capabilities::detect(&pool).await?;

      Self::with_pool(pool, capabilities).await
   }

   /// Build a store on an existing pool with already detected capabilities.
   pub async fn with_pool(pool: ConnectionPool, capabilities: Capabilities) -> Result<Self> {
      pool
         .with_connection(async |conn: &mut SqliteConnection| {
            sqlx::raw_sql(SCHEMA).execute(&mut *conn).await?;
            Ok::<_, Error>(())
         })
         .await?;

      info!(path = %pool.path().display(), "Opened quarantine store");
      Ok(Self { pool, capabilities })
   }

   /// Record a newly quarantined file.
   pub async fn add_entry(&self, entry: NewQuarantineEntry) -> Result<QuarantineEntry> {
      let file_size =
         i64::try_from(entry.file_size).map_err(|_| Error::FileSizeOutOfRange(entry.file_size))?;
      let detected_at = entry.detected_at.unix_timestamp();
      let use_returning = self.capabilities.supports_returning;

      let id = self
         .pool
         .with_connection(async |conn: &mut SqliteConnection| {
            let insert = "INSERT INTO quarantine \
               (original_path, quarantine_path, threat_name, file_size, file_hash, detected_at) \
               VALUES ($1, $2, $3, $4, $5, $6)";

            let id = if use_returning {
               sqlx::query_scalar::<_, i64>(&format!("{insert} RETURNING id"))
                  .bind(&entry.original_path)
                  .bind(&entry.quarantine_path)
                  .bind(&entry.threat_name)
                  .bind(file_size)
                  .bind(&entry.file_hash)
                  .bind(detected_at)
                  .fetch_one(&mut *conn)
                  .await
            } else {
               sqlx::query(insert)
                  .bind(&entry.original_path)
                  .bind(&entry.quarantine_path)
                  .bind(&entry.threat_name)
                  .bind(file_size)
                  .bind(&entry.file_hash)
                  .bind(detected_at)
                  .execute(&mut *conn)
                  .await
                  .map(|result| result.last_insert_rowid())
            };

            id.map_err(|e| Error::from_insert(e, &entry.quarantine_path))
         })
         .await?;

      debug!(id, threat = %entry.threat_name, "Added quarantine entry");

      Ok(QuarantineEntry {
         id,
         original_path: entry.original_path,
         quarantine_path: entry.quarantine_path,
         threat_name: entry.threat_name,
         file_size: entry.file_size,
         file_hash: entry.file_hash,
         detected_at: from_timestamp(detected_at)?,
      })
   }

   /// Look up an entry by id.
   pub async fn get_entry(&self, id: i64) -> Result<Option<QuarantineEntry>> {
      self
         .read(async |conn: &mut SqliteConnection| {
            let row = sqlx::query(&format!("SELECT {COLUMNS} FROM quarantine WHERE id = $1"))
               .bind(id)
               .fetch_optional(&mut *conn)
               .await?;
            row.as_ref().map(decode_entry).transpose()
         })
         .await
   }

   /// Most recent entry quarantined from `original_path`.
   pub async fn get_entry_by_original_path(
      &self,
      original_path: &str,
   ) -> Result<Option<QuarantineEntry>> {
      self
         .read(async |conn: &mut SqliteConnection| {
            let row = sqlx::query(&format!(
               "SELECT {COLUMNS} FROM quarantine WHERE original_path = $1 \
                ORDER BY detected_at DESC, id DESC LIMIT 1"
            ))
            .bind(original_path)
            .fetch_optional(&mut *conn)
            .await?;
            row.as_ref().map(decode_entry).transpose()
         })
         .await
   }

   /// All entries, newest first.
   pub async fn list_entries(&self) -> Result<Vec<QuarantineEntry>> {
      self
         .read(async |conn: &mut SqliteConnection| {
            let rows = sqlx::query(&format!(
               "SELECT {COLUMNS} FROM quarantine ORDER BY detected_at DESC, id DESC"
            ))
            .fetch_all(&mut *conn)
            .await?;
            rows.iter().map(decode_entry).collect()
         })
         .await
   }

   /// Delete an entry. Returns whether it existed.
   pub async fn remove_entry(&self, id: i64) -> Result<bool> {
      let removed = self
         .pool
         .with_connection(async |conn: &mut SqliteConnection| {
            let result = sqlx::query("DELETE FROM quarantine WHERE id = $1")
               .bind(id)
               .execute(&mut *conn)
               .await?;
            Ok::<_, Error>(result.rows_affected() > 0)
         })
         .await?;

      debug!(id, removed, "Removed quarantine entry");
      Ok(removed)
   }

   pub async fn entry_count(&self) -> Result<u64> {
      self
         .read(async |conn: &mut SqliteConnection| {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quarantine")
               .fetch_one(&mut *conn)
               .await?;
            Ok(count.max(0) as u64)
         })
         .await
   }

   /// Combined size in bytes of all quarantined files.
   pub async fn total_size(&self) -> Result<u64> {
      self
         .read(async |conn: &mut SqliteConnection| {
            let total: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(file_size), 0) FROM quarantine")
               .fetch_one(&mut *conn)
               .await?;
            Ok(total.max(0) as u64)
         })
         .await
   }

   /// Entries detected more than `days` days ago, oldest first.
   pub async fn entries_older_than(&self, days: u32) -> Result<Vec<QuarantineEntry>> {
      self.entries_before_timestamp(cutoff_for(days)).await
   }

   /// Entries detected strictly before `cutoff`, oldest first.
   pub async fn entries_detected_before(
      &self,
      cutoff: OffsetDateTime,
   ) -> Result<Vec<QuarantineEntry>> {
      self.entries_before_timestamp(cutoff.unix_timestamp()).await
   }

   /// Delete entries detected more than `days` days ago and return them.
   pub async fn cleanup_older_than(&self, days: u32) -> Result<Vec<QuarantineEntry>> {
      self.remove_before_timestamp(cutoff_for(days)).await
   }

   /// Delete entries detected strictly before `cutoff` and return them.
   ///
   /// Selection and deletion run in one transaction.
   pub async fn remove_detected_before(
      &self,
      cutoff: OffsetDateTime,
   ) -> Result<Vec<QuarantineEntry>> {
      self.remove_before_timestamp(cutoff.unix_timestamp()).await
   }

   async fn entries_before_timestamp(&self, cutoff: i64) -> Result<Vec<QuarantineEntry>> {
      self
         .read(async |conn: &mut SqliteConnection| select_before(conn, cutoff).await)
         .await
   }

   async fn remove_before_timestamp(&self, cutoff: i64) -> Result<Vec<QuarantineEntry>> {
      let removed = self
         .pool
         .with_connection(async |conn: &mut SqliteConnection| {
            let entries = select_before(conn, cutoff).await?;
            sqlx::query("DELETE FROM quarantine WHERE detected_at < $1")
               .bind(cutoff)
               .execute(&mut *conn)
               .await?;
            Ok::<_, Error>(entries)
         })
         .await?;

      if !removed.is_empty() {
         info!(count = removed.len(), "Cleaned up expired quarantine entries");
      }
      Ok(removed)
   }

   /// Capabilities detected when the store was opened.
   pub fn capabilities(&self) -> &Capabilities {
      &self.capabilities
   }

   pub fn pool(&self) -> &ConnectionPool {
      &self.pool
   }

   /// Close every pooled connection. The store is unusable afterwards.
   pub async fn close(&self) {
      self.pool.close_all().await;
   }

   /// Run a read on a pooled connection outside any transaction.
   async fn read<T, F>(&self, f: F) -> Result<T>
   where
      F: AsyncFnOnce(&mut SqliteConnection) -> Result<T>,
   {
      let mut conn = self.pool.acquire(self.pool.config().acquire_timeout).await?;
      let result = f(&mut *conn).await;
      self.pool.release(conn).await;
      result
   }
}

async fn select_before(conn: &mut SqliteConnection, cutoff: i64) -> Result<Vec<QuarantineEntry>> {
   let rows = sqlx::query(&format!(
      "SELECT {COLUMNS} FROM quarantine WHERE detected_at < $1 ORDER BY detected_at ASC, id ASC"
   ))
   .bind(cutoff)
   .fetch_all(&mut *conn)
   .await?;

   rows.iter().map(decode_entry).collect()
}

fn decode_entry(row: &SqliteRow) -> Result<QuarantineEntry> {
   let file_size: i64 = row.try_get("file_size")?;
   let detected_at: i64 = row.try_get("detected_at")?;

   Ok(QuarantineEntry {
      id: row.try_get("id")?,
      original_path: row.try_get("original_path")?,
      quarantine_path: row.try_get("quarantine_path")?,
      threat_name: row.try_get("threat_name")?,
      file_size: file_size.max(0) as u64,
      file_hash: row.try_get("file_hash")?,
      detected_at: from_timestamp(detected_at)?,
   })
}

fn from_timestamp(timestamp: i64) -> Result<OffsetDateTime> {
   OffsetDateTime::from_unix_timestamp(timestamp).map_err(|_| Error::InvalidTimestamp(timestamp))
}

/// Unix time `days` days ago. Saturates instead of leaving the range
/// `OffsetDateTime` can represent, so huge ages simply match nothing.
fn cutoff_for(days: u32) -> i64 {
   let age = time::Duration::days(i64::from(days)).whole_seconds();
   OffsetDateTime::now_utc().unix_timestamp().saturating_sub(age)
}
