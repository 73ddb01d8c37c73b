//! Bounded pool of reusable SQLite connections

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::PoolConfig;
use crate::connection::PooledConnection;
use crate::error::{Error, Result};

/// Bounded pool of SQLite connections to a single database file.
///
/// ## Architecture
///
/// - **`idle`**: FIFO queue of connections ready to be handed out
/// - **`total_created`**: live connections, idle and checked out combined,
///   never more than `max_connections`
/// - **`closed`**: once set, nothing is handed out and returned connections
///   are disposed
///
/// Every connection is opened with WAL journaling, foreign key enforcement and
/// the configured busy timeout, whether it is the first one or a replacement
/// for a connection that failed its liveness check.
///
/// ## Usage Pattern
///
/// ```text
/// 1. Create the pool (no connections are opened yet)
/// 2. acquire() -> use the connection -> release(), or with_connection(..)
/// 3. close_all() when the database is no longer needed
/// ```
///
/// Cloning is cheap; clones share the same connections.
#[derive(Clone)]
pub struct ConnectionPool {
   inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
   path: PathBuf,
   config: PoolConfig,

   /// Guards the idle queue and the live count together
   state: Mutex<PoolState>,

   /// Woken on release, disposal and close
   released: Notify,

   closed: AtomicBool,

   /// Makes the liveness check fail, for exercising the disposal path
   #[cfg(test)]
   fail_liveness: AtomicBool,
}

#[derive(Default)]
struct PoolState {
   idle: VecDeque<SqliteConnection>,
   total_created: u32,
}

enum Checkout {
   Idle(SqliteConnection),
   Reserved,
   Saturated,
}

impl ConnectionPool {
   /// Create a pool for the database at `path`.
   ///
   /// No connection is opened until the first [`acquire`](Self::acquire).
   /// Fails with [`Error::InvalidCapacity`] when `max_connections` is 0.
   pub fn new(path: impl AsRef<Path>, custom_config: Option<PoolConfig>) -> Result<Self> {
      let config = custom_config.unwrap_or_default();

      if config.max_connections < 1 {
         return Err(Error::InvalidCapacity(config.max_connections));
      }

      let path = path.as_ref().to_path_buf();
      debug!(path = %path.display(), max_connections = config.max_connections, "Created connection pool");

      Ok(Self {
         inner: Arc::new(PoolInner {
            path,
            config,
            state: Mutex::new(PoolState::default()),
            released: Notify::new(),
            closed: AtomicBool::new(false),
            #[cfg(test)]
            fail_liveness: AtomicBool::new(false),
         }),
      })
   }

   /// Check out a connection, waiting up to `timeout` when the pool is saturated.
   ///
   /// An idle connection is reused first. Otherwise a new one is opened if the
   /// pool is below capacity. Otherwise the call waits for another caller to
   /// release one; `None` waits indefinitely and `Some(Duration::ZERO)` fails
   /// fast with [`Error::Timeout`].
   pub async fn acquire(&self, timeout: Option<Duration>) -> Result<PooledConnection> {
      let deadline =
         timeout.and_then(|limit| Instant::now().checked_add(limit).map(|at| (at, limit)));

      loop {
         let released = self.inner.released.notified();
         tokio::pin!(released);
         // Register before inspecting state so a release in between is not missed
         released.as_mut().enable();

         if self.inner.is_closed() {
            return Err(Error::PoolClosed);
         }

         match self.inner.checkout() {
            Checkout::Idle(conn) => {
               trace!("Reusing idle connection");
               return Ok(PooledConnection::new(conn, Arc::clone(&self.inner)));
            }
            Checkout::Reserved => {
               let conn = self.inner.open_reserved().await?;
               return Ok(PooledConnection::new(conn, Arc::clone(&self.inner)));
            }
            Checkout::Saturated => {
               trace!("Pool saturated, waiting for a release");
            }
         }

         match deadline {
            Some((at, limit)) => {
               if tokio::time::timeout_at(at, released).await.is_err() {
                  return Err(Error::Timeout(limit));
               }
            }
            None => released.await,
         }
      }
   }

   /// Return a connection to the pool.
   ///
   /// Healthy connections go back to the idle queue. Connections that fail the
   /// liveness check are closed and their slot freed for a replacement. After
   /// [`close_all`](Self::close_all) the connection is simply closed. Never fails.
   pub async fn release(&self, conn: PooledConnection) {
      debug_assert!(
         conn.belongs_to(&self.inner),
         "connection released into a pool it was not acquired from"
      );
      conn.release().await;
   }

   /// Run `f` inside a transaction on a pooled connection.
   ///
   /// Acquires with the configured `acquire_timeout` and issues
   /// `BEGIN IMMEDIATE`. If `f` succeeds the transaction is committed. If it
   /// fails the transaction is rolled back and the error from `f` is returned;
   /// a failing rollback is logged and otherwise ignored. The connection goes
   /// back to the pool on every path.
   pub async fn with_connection<T, E, F>(&self, f: F) -> std::result::Result<T, E>
   where
      F: AsyncFnOnce(&mut SqliteConnection) -> std::result::Result<T, E>,
      E: From<Error>,
   {
      let mut conn = self.acquire(self.inner.config.acquire_timeout).await?;
      let outcome = run_in_transaction(&mut conn, f).await;
      conn.release().await;
      outcome
   }

   /// Close every idle connection and refuse further checkouts.
   ///
   /// Waiters are woken and fail with [`Error::PoolClosed`]. Connections
   /// currently checked out are closed when they are released.
   pub async fn close_all(&self) {
      self.inner.closed.store(true, Ordering::SeqCst);
      self.inner.released.notify_waiters();

      let drained: Vec<SqliteConnection> = {
         let mut state = self.inner.state.lock();
         let drained: Vec<_> = state.idle.drain(..).collect();
         state.total_created = state.total_created.saturating_sub(drained.len() as u32);
         drained
      };

      debug!(
         path = %self.inner.path.display(),
         idle = drained.len(),
         "Closing connection pool"
      );

      for conn in drained {
         dispose(conn).await;
      }
   }

   /// Path of the database file
   pub fn path(&self) -> &Path {
      &self.inner.path
   }

   /// Configuration the pool was created with
   pub fn config(&self) -> &PoolConfig {
      &self.inner.config
   }

   /// Maximum number of live connections
   pub fn capacity(&self) -> u32 {
      self.inner.config.max_connections
   }

   /// Live connections, idle and checked out
   pub fn total_created(&self) -> u32 {
      self.inner.state.lock().total_created
   }

   /// Connections waiting in the idle queue
   pub fn idle_count(&self) -> usize {
      self.inner.state.lock().idle.len()
   }

   pub fn is_closed(&self) -> bool {
      self.inner.is_closed()
   }
}

impl fmt::Debug for ConnectionPool {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let state = self.inner.state.lock();
      f.debug_struct("ConnectionPool")
         .field("path", &self.inner.path)
         .field("capacity", &self.inner.config.max_connections)
         .field("total_created", &state.total_created)
         .field("idle", &state.idle.len())
         .field("closed", &self.inner.is_closed())
         .finish()
   }
}

impl PoolInner {
   pub(crate) fn is_closed(&self) -> bool {
      self.closed.load(Ordering::SeqCst)
   }

   fn checkout(&self) -> Checkout {
      let mut state = self.state.lock();

      if let Some(conn) = state.idle.pop_front() {
         return Checkout::Idle(conn);
      }

      if state.total_created < self.config.max_connections {
         state.total_created += 1;
         return Checkout::Reserved;
      }

      Checkout::Saturated
   }

   /// Open a connection into a slot already counted by `checkout`
   async fn open_reserved(&self) -> Result<SqliteConnection> {
      let slot = SlotGuard::new(self);
      let conn = self.open_connection().await?;

      if self.is_closed() {
         slot.free();
         dispose(conn).await;
         return Err(Error::PoolClosed);
      }

      slot.keep();
      debug!(path = %self.path.display(), "Opened new pooled connection");
      Ok(conn)
   }

   async fn open_connection(&self) -> Result<SqliteConnection> {
      if self.config.create_if_missing
         && let Some(parent) = self.path.parent()
         && !parent.as_os_str().is_empty()
      {
         tokio::fs::create_dir_all(parent).await?;
      }

      let options = SqliteConnectOptions::new()
         .filename(&self.path)
         .create_if_missing(self.config.create_if_missing)
         .busy_timeout(self.config.busy_timeout)
         .foreign_keys(true);

      let mut conn = options.connect().await?;

      if let Err(e) = configure(&mut conn).await {
         warn!(path = %self.path.display(), error = %e, "Failed to configure new connection");
         dispose(conn).await;
         return Err(e);
      }

      Ok(conn)
   }

   pub(crate) async fn release(&self, mut conn: SqliteConnection, invalidated: bool) {
      if self.is_closed() {
         trace!("Pool closed, disposing released connection");
         dispose(conn).await;
         return;
      }

      // Dropping this future during the liveness check drops `conn` with it
      let slot = SlotGuard::new(self);
      let healthy = !invalidated && self.is_alive(&mut conn).await;

      if !healthy {
         debug!(invalidated, "Released connection failed liveness check, disposing");
         drop(slot);
         dispose(conn).await;
         return;
      }

      let rejected = {
         let mut state = self.state.lock();
         if self.is_closed() {
            Some((conn, false))
         } else if state.idle.len() < self.config.max_connections as usize {
            state.idle.push_back(conn);
            None
         } else {
            Some((conn, true))
         }
      };

      match rejected {
         None => {
            slot.keep();
            trace!("Connection returned to idle queue");
            self.released.notify_one();
         }
         Some((conn, counted)) => {
            if counted {
               warn!("Idle queue already full, disposing released connection");
               slot.free();
            } else {
               slot.keep();
            }
            dispose(conn).await;
         }
      }
   }

   async fn is_alive(&self, conn: &mut SqliteConnection) -> bool {
      #[cfg(test)]
      let forced_failure = self.fail_liveness.load(Ordering::SeqCst);
      #[cfg(not(test))]
      let forced_failure = false;

      !forced_failure && conn.ping().await.is_ok()
   }

   /// Synchronous fallback for guards dropped outside a tokio runtime
   pub(crate) fn discard(&self, conn: SqliteConnection) {
      drop(conn);
      if !self.is_closed() {
         self.forget_slot();
      }
   }

   fn forget_slot(&self) {
      {
         let mut state = self.state.lock();
         state.total_created = state.total_created.saturating_sub(1);
      }
      self.released.notify_one();
   }
}

/// A counted slot whose connection is in flight.
///
/// Dropped while armed, the slot is given back unless the pool was closed in
/// the meantime. Covers both failed opens and futures cancelled mid-await.
struct SlotGuard<'a> {
   pool: &'a PoolInner,
   armed: bool,
}

impl<'a> SlotGuard<'a> {
   fn new(pool: &'a PoolInner) -> Self {
      Self { pool, armed: true }
   }

   /// The slot stays counted
   fn keep(mut self) {
      self.armed = false;
   }

   /// Give the slot back now, closed or not
   fn free(mut self) {
      self.armed = false;
      self.pool.forget_slot();
   }
}

impl Drop for SlotGuard<'_> {
   fn drop(&mut self) {
      if self.armed && !self.pool.is_closed() {
         self.pool.forget_slot();
      }
   }
}

async fn configure(conn: &mut SqliteConnection) -> Result<()> {
   let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode = WAL")
      .fetch_one(&mut *conn)
      .await?;

   sqlx::query("PRAGMA foreign_keys = ON")
      .execute(&mut *conn)
      .await?;

   if !journal_mode.eq_ignore_ascii_case("wal") {
      debug!(journal_mode = %journal_mode, "Database does not support WAL journaling");
   }

   Ok(())
}

async fn dispose(conn: SqliteConnection) {
   if let Err(e) = conn.close().await {
      debug!(error = %e, "Error while closing connection");
   }
}

async fn run_in_transaction<T, E, F>(conn: &mut PooledConnection, f: F) -> std::result::Result<T, E>
where
   F: AsyncFnOnce(&mut SqliteConnection) -> std::result::Result<T, E>,
   E: From<Error>,
{
   sqlx::query("BEGIN IMMEDIATE")
      .execute(&mut **conn)
      .await
      .map_err(Error::Sqlx)?;

   // Until the transaction is finished, a dropped guard must not be reused
   conn.set_invalidated(true);

   match f(&mut **conn).await {
      Ok(value) => match sqlx::query("COMMIT").execute(&mut **conn).await {
         Ok(_) => {
            conn.set_invalidated(false);
            Ok(value)
         }
         Err(e) => {
            rollback_quietly(conn).await;
            Err(Error::Sqlx(e).into())
         }
      },
      Err(e) => {
         rollback_quietly(conn).await;
         Err(e)
      }
   }
}

async fn rollback_quietly(conn: &mut PooledConnection) {
   match sqlx::query("ROLLBACK").execute(&mut **conn).await {
      Ok(_) => conn.set_invalidated(false),
      Err(e) => {
         warn!(error = %e, "Rollback failed, connection will be disposed on release");
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use tempfile::TempDir;

   fn single_slot_pool(temp_dir: &TempDir) -> ConnectionPool {
      let config = PoolConfig {
         max_connections: 1,
         acquire_timeout: Some(Duration::from_secs(5)),
         ..Default::default()
      };
      ConnectionPool::new(temp_dir.path().join("liveness.db"), Some(config)).unwrap()
   }

   #[tokio::test]
   async fn test_failed_liveness_check_disposes_connection() {
      let temp_dir = TempDir::new().unwrap();
      let pool = single_slot_pool(&temp_dir);

      let conn = pool.acquire(None).await.unwrap();
      assert!(!conn.is_invalidated());
      assert_eq!(pool.total_created(), 1);

      pool.inner.fail_liveness.store(true, Ordering::SeqCst);
      pool.release(conn).await;

      assert_eq!(pool.total_created(), 0);
      assert_eq!(pool.idle_count(), 0);

      pool.inner.fail_liveness.store(false, Ordering::SeqCst);
      let conn = pool.acquire(Some(Duration::ZERO)).await.unwrap();
      assert_eq!(pool.total_created(), 1);

      pool.release(conn).await;
      assert_eq!(pool.idle_count(), 1);

      pool.close_all().await;
   }
}
