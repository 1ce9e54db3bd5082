//! Store configuration

use std::path::PathBuf;

use serde::Deserialize;
use sqlx_sqlite_file_pool::PoolConfig;

use crate::Result;

/// Configuration for a [`SqliteStore`](crate::SqliteStore)
///
/// ```
/// use tile_cache_sqlite::StoreConfig;
///
/// let config = StoreConfig::from_json_str(
///    r#"{ "root_directory": "/var/cache/tiles", "pool": { "max_size": 50 } }"#,
/// )
/// .unwrap();
///
/// assert_eq!(config.pool.max_size, 50);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
   /// Directory every database file of the store lives under
   pub root_directory: PathBuf,

   /// Connection pool settings; omitted fields use their defaults
   #[serde(default)]
   pub pool: PoolConfig,
}

impl StoreConfig {
   pub fn new(root_directory: impl Into<PathBuf>) -> Self {
      Self {
         root_directory: root_directory.into(),
         pool: PoolConfig::default(),
      }
   }

   pub fn from_json_str(json: &str) -> Result<Self> {
      Ok(serde_json::from_str(json)?)
   }
}
