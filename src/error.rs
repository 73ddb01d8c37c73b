/// Result type alias for quarantine store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for quarantine store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from SQLx operations.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// Error from the connection pool.
   #[error(transparent)]
   Pool(#[from] sqlx_sqlite_pool::Error),

   /// Another entry already points at this quarantine file.
   #[error("an entry for quarantine path '{0}' already exists")]
   DuplicateQuarantinePath(String),

   /// Stored detection time cannot be represented.
   #[error("stored timestamp {0} is out of range")]
   InvalidTimestamp(i64),

   /// File size too large for a SQLite INTEGER.
   #[error("file size {0} does not fit in a SQLite integer")]
   FileSizeOutOfRange(u64),
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Sqlx(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::Pool(e) => match e {
            sqlx_sqlite_pool::Error::InvalidCapacity(_) => "INVALID_POOL_CAPACITY",
            sqlx_sqlite_pool::Error::PoolClosed => "POOL_CLOSED",
            sqlx_sqlite_pool::Error::Timeout(_) => "POOL_TIMEOUT",
            sqlx_sqlite_pool::Error::Io(_) => "IO_ERROR",
            sqlx_sqlite_pool::Error::Sqlx(_) => "CONNECTION_ERROR",
         }
         .to_string(),
         Error::DuplicateQuarantinePath(_) => "DUPLICATE_QUARANTINE_PATH".to_string(),
         Error::InvalidTimestamp(_) => "INVALID_TIMESTAMP".to_string(),
         Error::FileSizeOutOfRange(_) => "FILE_SIZE_OUT_OF_RANGE".to_string(),
      }
   }

   /// Map a failed insert to [`Error::DuplicateQuarantinePath`] when it hit
   /// the unique quarantine path constraint.
   pub(crate) fn from_insert(err: sqlx::Error, quarantine_path: &str) -> Self {
      match err.as_database_error() {
         Some(db_err) if db_err.is_unique_violation() => {
            Error::DuplicateQuarantinePath(quarantine_path.to_string())
         }
         _ => Error::Sqlx(err),
      }
   }
}
