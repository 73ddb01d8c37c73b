//! # sqlx-sqlite-pool
//!
//! A small, bounded pool of SQLx SQLite connections for desktop applications
//! that keep their state in a single local database file.
//!
//! ## Core Types
//!
//! - **[`ConnectionPool`]**: Bounded pool handing out health-checked connections
//! - **[`PoolConfig`]**: Capacity, timeouts and file creation settings
//! - **[`PooledConnection`]**: Guard for a checked-out connection
//! - **[`Error`]**: Error type for pool operations
//!
//! ## Behavior
//!
//! - **Bounded**: never more than `max_connections` live connections
//! - **Uniform setup**: every connection runs in WAL mode with foreign keys on
//! - **Self-healing**: connections failing the liveness check on release are
//!   closed and their slot freed for a replacement
//! - **Scoped transactions**: [`ConnectionPool::with_connection`] commits on
//!   success, rolls back on error and always returns the connection

mod config;
mod connection;
mod error;
mod pool;

// Re-export public types
pub use config::PoolConfig;
pub use connection::PooledConnection;
pub use error::{Error, Result};
pub use pool::ConnectionPool;
