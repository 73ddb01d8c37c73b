//! Guard for a connection checked out of a [`ConnectionPool`](crate::ConnectionPool)

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use sqlx::sqlite::SqliteConnection;
use tracing::{trace, warn};

use crate::pool::PoolInner;

/// A connection checked out of the pool.
///
/// Derefs to [`SqliteConnection`], so it can be used directly as an executor:
///
/// ```no_run
/// # async fn demo(pool: sqlx_sqlite_pool::ConnectionPool) -> sqlx_sqlite_pool::Result<()> {
/// let mut conn = pool.acquire(None).await?;
/// sqlx::query("SELECT 1").execute(&mut *conn).await?;
/// pool.release(conn).await;
/// # Ok(())
/// # }
/// ```
///
/// Prefer an explicit [`release`](crate::ConnectionPool::release). A guard
/// that is simply dropped is released on a spawned task, or discarded when no
/// tokio runtime is running.
#[must_use = "if unused, the connection is immediately returned to the pool"]
pub struct PooledConnection {
   conn: Option<SqliteConnection>,
   pool: Arc<PoolInner>,
   invalidated: bool,
}

impl PooledConnection {
   pub(crate) fn new(conn: SqliteConnection, pool: Arc<PoolInner>) -> Self {
      Self {
         conn: Some(conn),
         pool,
         invalidated: false,
      }
   }

   /// Mark this connection as broken.
   ///
   /// It fails the liveness check on release and is closed instead of being
   /// reused, freeing its slot for a fresh connection.
   pub fn invalidate(&mut self) {
      self.invalidated = true;
   }

   pub fn is_invalidated(&self) -> bool {
      self.invalidated
   }

   pub(crate) fn set_invalidated(&mut self, invalidated: bool) {
      self.invalidated = invalidated;
   }

   pub(crate) fn belongs_to(&self, pool: &Arc<PoolInner>) -> bool {
      Arc::ptr_eq(&self.pool, pool)
   }

   /// Hand the connection back to the pool it came from
   pub(crate) async fn release(mut self) {
      if let Some(conn) = self.conn.take() {
         self.pool.release(conn, self.invalidated).await;
      }
   }
}

impl Deref for PooledConnection {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      self
         .conn
         .as_ref()
         .expect("connection already returned to pool")
   }
}

impl DerefMut for PooledConnection {
   fn deref_mut(&mut self) -> &mut Self::Target {
      self
         .conn
         .as_mut()
         .expect("connection already returned to pool")
   }
}

impl Drop for PooledConnection {
   fn drop(&mut self) {
      let Some(conn) = self.conn.take() else {
         return;
      };

      let pool = Arc::clone(&self.pool);
      let invalidated = self.invalidated;

      match tokio::runtime::Handle::try_current() {
         Ok(handle) => {
            trace!("PooledConnection dropped, releasing on background task");
            handle.spawn(async move {
               pool.release(conn, invalidated).await;
            });
         }
         Err(_) => {
            warn!("No tokio runtime while dropping PooledConnection, discarding connection");
            pool.discard(conn);
         }
      }
   }
}

impl fmt::Debug for PooledConnection {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("PooledConnection")
         .field("released", &self.conn.is_none())
         .field("invalidated", &self.invalidated)
         .finish()
   }
}
