//! Native SQLite connection owned by one pool entry

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{Connection, SqliteConnection};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::key::ResourceKey;
use crate::{Error, Result};

/// The single open connection to one database file.
///
/// Units of work receive a `&PooledConnection` and lock it for as long as they
/// need the native handle:
///
/// ```no_run
/// # async fn example(conn: &sqlx_sqlite_file_pool::PooledConnection) -> sqlx::Result<()> {
/// let mut handle = conn.lock().await;
/// sqlx::query("CREATE TABLE IF NOT EXISTS tiles (z INTEGER, x INTEGER, y INTEGER, data BLOB)")
///    .execute(&mut *handle)
///    .await?;
/// # Ok(())
/// # }
/// ```
///
/// Every holder of the same key shares this one handle, including nested
/// work on the same key. Drop the guard before starting nested work on the
/// same file, otherwise the nested work waits on it forever.
#[derive(Debug)]
pub struct PooledConnection {
   key: ResourceKey,
   conn: Mutex<SqliteConnection>,
}

impl PooledConnection {
   /// Open the database behind `key`, creating the file and its parent
   /// directories when missing
   pub(crate) async fn open(key: &ResourceKey, busy_timeout: Duration) -> Result<Self> {
      let connection_error = |source| Error::Connection {
         path: key.path().to_path_buf(),
         source,
      };

      if let Some(parent) = key.path().parent() {
         tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| connection_error(sqlx::Error::Io(e)))?;
      }

      let options = SqliteConnectOptions::new()
         .filename(key.path())
         .create_if_missing(true)
         .journal_mode(SqliteJournalMode::Delete)
         .busy_timeout(busy_timeout);

      let mut conn = SqliteConnection::connect_with(&options)
         .await
         .map_err(connection_error)?;

      // Opening is lazy in SQLite; touching the schema surfaces files that are
      // not databases at all.
      if let Err(e) = sqlx::query_scalar::<_, i64>("PRAGMA schema_version")
         .fetch_one(&mut conn)
         .await
      {
         let _ = conn.close().await;
         return Err(connection_error(e));
      }

      debug!(path = %key, "Opened database connection");

      Ok(Self {
         key: key.clone(),
         conn: Mutex::new(conn),
      })
   }

   /// Lock the native connection for use as a sqlx executor
   pub async fn lock(&self) -> MutexGuard<'_, SqliteConnection> {
      self.conn.lock().await
   }

   /// Path of the database file this connection is open on
   pub fn path(&self) -> &Path {
      self.key.path()
   }

   pub(crate) async fn close(self) -> std::result::Result<(), sqlx::Error> {
      let key = self.key;
      self.conn.into_inner().close().await?;
      debug!(path = %key, "Closed database connection");
      Ok(())
   }
}
