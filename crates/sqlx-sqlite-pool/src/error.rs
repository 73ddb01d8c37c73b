//! Error types for sqlx-sqlite-pool

use std::time::Duration;

use thiserror::Error;

/// Errors that may occur when working with sqlx-sqlite-pool
#[derive(Error, Debug)]
pub enum Error {
   /// The pool was configured with room for no connections at all
   #[error("Pool capacity must be at least 1, got {0}")]
   InvalidCapacity(u32),

   /// Pool has been shut down and will not hand out connections again
   #[error("Connection pool has been closed")]
   PoolClosed,

   /// Every connection stayed checked out for the whole wait
   #[error("Timed out after {0:?} waiting for a connection")]
   Timeout(Duration),

   /// IO error when preparing the database location. Standard library IO
   /// errors are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library. Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),
}

impl Error {
   /// Whether retrying the same call later could succeed.
   ///
   /// A timeout means the pool is saturated; a closed pool never recovers.
   pub fn is_transient(&self) -> bool {
      matches!(self, Error::Timeout(_))
   }
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
