//! # tile-cache-sqlite
//!
//! SQLite storage for a tile cache. Tiles of a layer are spread over many
//! database files under a store root; every file is served through a
//! [`sqlx_sqlite_file_pool::SqliteConnectionManager`].
//!
//! - **[`SqliteStore`]**: A root directory plus the manager serving it
//! - **[`StoreConfig`]**: JSON-loadable store settings
//! - **[`ReplaceOperation`]**: Replaces a layer's databases from an upload or a
//!   server-side file or directory

mod config;
mod error;
mod operations;
mod store;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use operations::{
   OperationStatus, ReplaceOperation, ReplaceRequest, ReplaceResponse, SingleStore, StoreResolver,
};
pub use store::SqliteStore;

// Re-export the connection manager so callers need a single dependency
pub use sqlx_sqlite_file_pool::{AccessMode, IdleReaper, PoolConfig, PooledConnection, SqliteConnectionManager};
