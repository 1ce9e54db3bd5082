//! Configuration for the keyed connection manager

use std::time::Duration;

use serde::Deserialize;

/// Configuration for [`SqliteConnectionManager`](crate::SqliteConnectionManager)
///
/// Durations are read from `*_ms` fields when deserialized.
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_file_pool::PoolConfig;
/// use std::time::Duration;
///
/// // Use defaults
/// let config = PoolConfig::default();
///
/// // Override just one field
/// let config = PoolConfig {
///     max_size: 1,
///     ..Default::default()
/// };
///
/// // Customize the reaping windows
/// let config = PoolConfig {
///     idle_timeout: Duration::from_secs(60),
///     drain_timeout: Duration::from_secs(2),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
   /// Maximum number of idle connections kept open
   ///
   /// Only idle connections count against this bound. A connection in use is
   /// never closed, so the pool may briefly hold more entries than this while
   /// work is running.
   ///
   /// Default: 100
   pub max_size: usize,

   /// Idle connections older than this are closed by
   /// [`reap_idle`](crate::SqliteConnectionManager::reap_idle)
   ///
   /// Default: 60 seconds
   #[serde(rename = "idle_timeout_ms", with = "millis")]
   pub idle_timeout: Duration,

   /// Upper bound on how long forced closes (reap-all, replace, remove) wait
   /// for in-flight work to finish before giving up with `PoolBusy`
   ///
   /// Default: 10 seconds
   #[serde(rename = "drain_timeout_ms", with = "millis")]
   pub drain_timeout: Duration,

   /// SQLite busy timeout applied to every opened connection
   ///
   /// Default: 5 seconds
   #[serde(rename = "busy_timeout_ms", with = "millis")]
   pub busy_timeout: Duration,
}

impl Default for PoolConfig {
   fn default() -> Self {
      Self {
         max_size: 100,
         idle_timeout: Duration::from_secs(60),
         drain_timeout: Duration::from_secs(10),
         busy_timeout: Duration::from_secs(5),
      }
   }
}

mod millis {
   use std::time::Duration;

   use serde::{Deserialize, Deserializer};

   pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
   where
      D: Deserializer<'de>,
   {
      u64::deserialize(deserializer).map(Duration::from_millis)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_partial_config_keeps_defaults() {
      let config: PoolConfig =
         serde_json::from_str(r#"{ "max_size": 3, "idle_timeout_ms": 1500 }"#).unwrap();

      assert_eq!(config.max_size, 3);
      assert_eq!(config.idle_timeout, Duration::from_millis(1500));
      assert_eq!(config.drain_timeout, PoolConfig::default().drain_timeout);
      assert_eq!(config.busy_timeout, PoolConfig::default().busy_timeout);
   }
}
