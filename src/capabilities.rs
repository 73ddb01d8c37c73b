//! Runtime capability detection for the quarantine database

use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use sqlx_sqlite_pool::ConnectionPool;
use tracing::{debug, warn};

use crate::Result;

/// First SQLite release with `INSERT ... RETURNING`
const RETURNING_MIN_VERSION: (u32, u32, u32) = (3, 35, 0);

/// What the SQLite library and database file behind a pool actually support.
///
/// Detected once when the store opens and handed to the components that care,
/// instead of being tracked in global flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
   /// Version string reported by `sqlite_version()`
   pub sqlite_version: String,
   /// Parsed `(major, minor, patch)`; missing parts are 0
   pub version: (u32, u32, u32),
   /// Journal mode in effect on pooled connections
   pub journal_mode: String,
   /// Whether foreign key constraints are enforced
   pub foreign_keys: bool,
   /// Whether `RETURNING` clauses are available
   pub supports_returning: bool,
}

impl Capabilities {
   pub fn wal_enabled(&self) -> bool {
      self.journal_mode.eq_ignore_ascii_case("wal")
   }
}

/// Inspect the database behind `pool` using one of its connections.
pub async fn detect(pool: &ConnectionPool) -> Result<Capabilities> {
   let mut conn = pool.acquire(pool.config().acquire_timeout).await?;
   let result = detect_on(&mut *conn).await;
   pool.release(conn).await;

   let capabilities = result?;
   debug!(
      sqlite_version = %capabilities.sqlite_version,
      journal_mode = %capabilities.journal_mode,
      foreign_keys = capabilities.foreign_keys,
      "Detected database capabilities"
   );

   if !capabilities.wal_enabled() {
      warn!(journal_mode = %capabilities.journal_mode, "Quarantine database is not in WAL mode");
   }

   Ok(capabilities)
}

async fn detect_on(conn: &mut SqliteConnection) -> Result<Capabilities> {
   let sqlite_version: String = sqlx::query_scalar("SELECT sqlite_version()")
      .fetch_one(&mut *conn)
      .await?;
   let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode")
      .fetch_one(&mut *conn)
      .await?;
   let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
      .fetch_one(&mut *conn)
      .await?;

   let version = parse_version(&sqlite_version);

   Ok(Capabilities {
      sqlite_version,
      version,
      journal_mode,
      foreign_keys: foreign_keys == 1,
      supports_returning: version >= RETURNING_MIN_VERSION,
   })
}

fn parse_version(version: &str) -> (u32, u32, u32) {
   let mut parts = version
      .trim()
      .split('.')
      .map(|part| part.parse::<u32>().unwrap_or(0));

   (
      parts.next().unwrap_or(0),
      parts.next().unwrap_or(0),
      parts.next().unwrap_or(0),
   )
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_parse_version() {
      assert_eq!(parse_version("3.46.0"), (3, 46, 0));
      assert_eq!(parse_version("3.35"), (3, 35, 0));
      assert_eq!(parse_version("garbage"), (0, 0, 0));
   }

   #[test]
   fn test_returning_threshold() {
      assert!(parse_version("3.35.0") >= RETURNING_MIN_VERSION);
      assert!(parse_version("3.34.1") < RETURNING_MIN_VERSION);
   }

   #[tokio::test]
   async fn test_detect_reports_pool_configuration() {
      let temp_dir = tempfile::TempDir::new().unwrap();
      let pool = ConnectionPool::new(temp_dir.path().join("capabilities.db"), None).unwrap();

      let capabilities = detect(&pool).await.unwrap();

      assert!(capabilities.wal_enabled());
      assert!(capabilities.foreign_keys);
      assert_eq!(capabilities.version.0, 3);
      assert_eq!(pool.idle_count(), 1, "Inspection connection should be released");
   }
}
