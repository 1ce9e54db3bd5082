//! # sqlx-sqlite-file-pool
//!
//! A keyed connection manager for applications that spread their data over
//! many SQLite files, such as a tile cache with one database per region.
//!
//! ## Core Types
//!
//! - **[`SqliteConnectionManager`]**: Runs work against per-file connections and
//!   performs whole-file replace and remove
//! - **[`PoolConfig`]**: Capacity and timeout settings
//! - **[`PooledConnection`]**: The one open connection for a file, handed to work
//! - **[`AccessMode`]**: Shared (read) or exclusive (write) access to a file
//! - **[`IdleReaper`]**: Periodic idle reaping driver
//! - **[`Error`]**: Error type for manager operations
//!
//! ## Architecture
//!
//! - **One connection per file**: opened lazily, shared by every holder of the file
//! - **Per-file read/write lock**: many readers or one writer per file; files are
//!   independent of each other. Multi-file operations lock in path order.
//! - **Bounded idle set**: idle connections beyond `max_size` are closed least
//!   recently used first; busy connections are never closed
//! - **Atomic replace**: a file is swapped by rename under its exclusive lock,
//!   so readers see the old or the new database and nothing in between
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use sqlx_sqlite_file_pool::{AccessMode, PoolConfig, SqliteConnectionManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = Arc::new(SqliteConnectionManager::new(PoolConfig::default()));
//!
//!     manager
//!         .do_work("tiles/europe.sqlite", AccessMode::Exclusive, |conn| {
//!             Box::pin(async move {
//!                 let mut conn = conn.lock().await;
//!                 sqlx::query("CREATE TABLE IF NOT EXISTS metadata (name TEXT PRIMARY KEY, value TEXT)")
//!                     .execute(&mut *conn)
//!                     .await
//!             })
//!         })
//!         .await?;
//!
//!     // Swap in a freshly staged database
//!     manager.replace("staging/europe.sqlite", "tiles/europe.sqlite").await?;
//!
//!     // Close everything at shutdown
//!     manager.reap_all().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod connection;
mod error;
mod key;
mod lock;
mod manager;
mod pool;
mod reaper;
mod replace;

// Re-export public types
pub use config::PoolConfig;
pub use connection::PooledConnection;
pub use error::{BoxError, Error, Result};
pub use key::ResourceKey;
pub use lock::AccessMode;
pub use manager::SqliteConnectionManager;
pub use pool::PoolStats;
pub use reaper::{IdleReaper, ReaperHandle};
