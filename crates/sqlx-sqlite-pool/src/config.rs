//! Configuration for SQLite connection pools

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`ConnectionPool`](crate::ConnectionPool)
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_pool::PoolConfig;
/// use std::time::Duration;
///
/// // Use defaults
/// let config = PoolConfig::default();
///
/// // Override just one field
/// let config = PoolConfig {
///     max_connections: 2,
///     ..Default::default()
/// };
///
/// // Wait forever in `with_connection`
/// let config = PoolConfig {
///     acquire_timeout: None,
///     busy_timeout: Duration::from_secs(5),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
   /// Maximum number of live connections, idle and checked out combined
   ///
   /// Must be at least 1.
   ///
   /// Default: 5
   pub max_connections: u32,

   /// How long [`with_connection`](crate::ConnectionPool::with_connection)
   /// waits for a connection when the pool is saturated
   ///
   /// `None` waits indefinitely.
   ///
   /// Default: 30 seconds
   pub acquire_timeout: Option<Duration>,

   /// SQLite busy timeout set on every connection
   ///
   /// This bounds how long a statement waits on a database lock held by
   /// another connection. It is unrelated to `acquire_timeout`.
   ///
   /// Default: 30 seconds
   pub busy_timeout: Duration,

   /// Create the database file (and its parent directories) if missing
   ///
   /// Default: true
   pub create_if_missing: bool,
}

impl Default for PoolConfig {
   fn default() -> Self {
      Self {
         max_connections: 5,
         acquire_timeout: Some(Duration::from_secs(30)),
         busy_timeout: Duration::from_secs(30),
         create_if_missing: true,
      }
   }
}
