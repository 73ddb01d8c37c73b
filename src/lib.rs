//! # quarantine-store
//!
//! Storage core of a desktop antivirus manager: metadata about quarantined
//! files, kept in a local SQLite database and accessed through a bounded
//! [`ConnectionPool`](sqlx_sqlite_pool::ConnectionPool).
//!
//! ```no_run
//! use quarantine_store::{NewQuarantineEntry, QuarantineStore};
//!
//! # async fn demo() -> quarantine_store::Result<()> {
//! let store = QuarantineStore::open("quarantine.db", None).await?;
//!
//! let entry = store
//!    .add_entry(NewQuarantineEntry::new(
//!       "/home/user/Downloads/invoice.exe",
//!       "/home/user/.local/share/quarantine/3f2a.bin",
//!       "Win.Trojan.Agent",
//!       48_128,
//!       "3f2a9c0d...",
//!    ))
//!    .await?;
//!
//! assert_eq!(store.entry_count().await?, 1);
//! store.remove_entry(entry.id).await?;
//! store.close().await;
//! # Ok(())
//! # }
//! ```

pub mod capabilities;
mod entry;
mod error;
mod store;

pub use capabilities::Capabilities;
pub use entry::{NewQuarantineEntry, QuarantineEntry};
pub use error::{Error, Result};
pub use sqlx_sqlite_pool::{ConnectionPool, PoolConfig};
pub use store::QuarantineStore;
