//! Keyed connection manager: runs work against per-file connections and
//! performs the exclusive operations (replace, remove, reap)

use std::path::Path;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::PoolConfig;
use crate::connection::PooledConnection;
use crate::error::BoxError;
use crate::key::ResourceKey;
use crate::lock::{self, AccessMode, LockTable};
use crate::pool::{ConnectionPool, PoolStats};
use crate::replace;
use crate::{Error, Result};

/// Manages one pooled SQLite connection per database file.
///
/// ## Architecture
///
/// - **Lock table**: a fair read/write lock per file. Work takes it shared or
///   exclusive; replace, remove and reaping take it exclusive.
/// - **Pool**: lazily opened connections with in-use counts. Idle
///   connections beyond `max_size` are closed after each unit of work, and
///   connections idle past `idle_timeout` are closed by [`reap_idle`].
/// - **Re-entry**: work may call back into the manager for a file its task
///   already holds. It re-enters the lock and shares the same connection.
///
/// The manager owns no timer; see [`IdleReaper`](crate::IdleReaper) for a
/// periodic [`reap_idle`] driver.
///
/// ## Usage Pattern
///
/// ```text
/// 1. Create one manager and share it (Arc) with every collaborator
/// 2. do_work(path, Shared | Exclusive, |conn| ...) for reads and writes
/// 3. replace / replace_dir / remove for whole-file operations
/// 4. reap_all at shutdown
/// ```
///
/// [`reap_idle`]: SqliteConnectionManager::reap_idle
pub struct SqliteConnectionManager {
   locks: LockTable,
   pool: ConnectionPool,
}

impl SqliteConnectionManager {
   pub fn new(config: PoolConfig) -> Self {
      debug!(
         max_size = config.max_size,
         idle_timeout_ms = config.idle_timeout.as_millis() as u64,
         "Created SQLite connection manager"
      );

      Self {
         locks: LockTable::default(),
         pool: ConnectionPool::new(config),
      }
   }

   pub fn config(&self) -> &PoolConfig {
      self.pool.config()
   }

   /// Run `work` against the connection for the database at `path`.
   ///
   /// The file's lock is taken in `mode` and the connection is opened on
   /// first use. Lock and connection are released on every exit path. A
   /// failure returned by `work` comes back as [`Error::Work`].
   ///
   /// ```no_run
   /// use sqlx_sqlite_file_pool::{AccessMode, PoolConfig, SqliteConnectionManager};
   ///
   /// # async fn example() -> sqlx_sqlite_file_pool::Result<()> {
   /// let manager = SqliteConnectionManager::new(PoolConfig::default());
   ///
   /// let count = manager
   ///    .do_work("tiles/europe.sqlite", AccessMode::Shared, |conn| {
   ///       Box::pin(async move {
   ///          let mut conn = conn.lock().await;
   ///          sqlx::query_scalar::<_, i64>("SELECT count(*) FROM tiles")
   ///             .fetch_one(&mut *conn)
   ///             .await
   ///       })
   ///    })
   ///    .await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn do_work<T, E, F>(&self, path: impl AsRef<Path>, mode: AccessMode, work: F) -> Result<T>
   where
      F: for<'c> FnOnce(&'c PooledConnection) -> BoxFuture<'c, std::result::Result<T, E>>,
      E: Into<BoxError>,
   {
      let key = ResourceKey::new(path)?;

      let output = lock::scoped(async {
         let _guard = self.locks.lock(&key, mode).await?;
         let lease = self.pool.acquire(&key).await?;

         work(lease.connection()).await.map_err(|e| Error::Work {
            path: key.path().to_path_buf(),
            source: e.into(),
         })
      })
      .await;

      self.pool.enforce_capacity(&self.locks).await;
      output
   }

   /// Replace the database at `target` with the file at `source`.
   ///
   /// Both files are locked exclusively (in key order) and their pooled
   /// connections closed, then `source` is moved over `target` in one
   /// atomic step. Readers see either the old or the new file, never a mix.
   /// The next work on `target` opens the new file. `source` is consumed.
   pub async fn replace(&self, source: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<()> {
      let source = ResourceKey::new(source)?;
      let target = ResourceKey::new(target)?;
      if source == target {
         return Ok(());
      }

      lock::scoped(async {
         let _guards = self
            .locks
            .lock_ordered(&[&source, &target], AccessMode::Exclusive)
            .await?;

         let deadline = Instant::now() + self.config().drain_timeout;
         self.pool.close_drained(&source, deadline).await?;
         self.pool.close_drained(&target, deadline).await?;

         let (from, to) = (source.path().to_path_buf(), target.path().to_path_buf());
         replace::blocking(move || replace::move_file(&from, &to))
            .await
            .map_err(|cause| Error::Replace {
               source_path: source.path().to_path_buf(),
               target: target.path().to_path_buf(),
               cause,
            })?;

         info!(source = %source, target = %target, "Replaced database file");
         Ok(())
      })
      .await
   }

   /// Replace every database below `target_prefix` that has a counterpart
   /// in `source_dir`, at the same relative path.
   ///
   /// Each file is replaced with [`replace`](Self::replace) on its own, so
   /// the exclusive window per file stays short. The directory as a whole
   /// is not swapped atomically: when a file fails, the files before it
   /// keep their new content and the rest stay untouched, reported as
   /// [`Error::PartialReplace`]. Returns the number of files replaced.
   pub async fn replace_dir(
      &self,
      source_dir: impl AsRef<Path>,
      target_prefix: impl AsRef<Path>,
   ) -> Result<usize> {
      let source_dir = source_dir.as_ref().to_path_buf();
      let target_prefix = target_prefix.as_ref();

      let listed = source_dir.clone();
      let files = replace::blocking(move || replace::list_files(&listed))
         .await
         .map_err(|cause| Error::Replace {
            source_path: source_dir.clone(),
            target: target_prefix.to_path_buf(),
            cause,
         })?;

      let total = files.len();
      for (replaced, (file, relative)) in files.into_iter().enumerate() {
         if let Err(cause) = self.replace(&file, target_prefix.join(&relative)).await {
            return Err(Error::PartialReplace {
               replaced,
               total,
               cause: Box::new(cause),
            });
         }
      }

      info!(
         source = %source_dir.display(),
         target = %target_prefix.display(),
         total,
         "Replaced database directory"
      );
      Ok(total)
   }

   /// Close the connection for `path` and delete the database file and its
   /// journal files. Returns whether the database file existed.
   pub async fn remove(&self, path: impl AsRef<Path>) -> Result<bool> {
      let key = ResourceKey::new(path)?;

      lock::scoped(async {
         let _guard = self.locks.lock(&key, AccessMode::Exclusive).await?;
         let deadline = Instant::now() + self.config().drain_timeout;
         self.pool.close_drained(&key, deadline).await?;

         let target = key.path().to_path_buf();
         let existed = replace::blocking(move || replace::remove_file(&target))
            .await
            .map_err(|cause| Error::Remove {
               path: key.path().to_path_buf(),
               cause,
            })?;

         debug!(path = %key, existed, "Removed database file");
         Ok(existed)
      })
      .await
   }

   /// Close every idle connection unused for longer than the idle timeout,
   /// measured at `now`. Busy connections are left alone and close failures
   /// are logged without stopping the sweep. Returns how many were closed.
   pub async fn reap_idle(&self, now: Instant) -> usize {
      self.pool.reap_idle(now, &self.locks).await
   }

   /// Close every pooled connection, waiting up to the drain timeout for
   /// in-flight work. Fails with [`Error::PoolBusy`] when some file is still
   /// in use at the deadline; everything else is closed regardless.
   pub async fn reap_all(&self) -> Result<usize> {
      self.pool.reap_all(&self.locks).await
   }

   /// Number of pooled connections, busy or idle
   pub fn pool_size(&self) -> usize {
      self.pool.size()
   }

   pub fn stats(&self) -> PoolStats {
      self.pool.stats()
   }

   /// Whether a connection for `path` is currently pooled
   pub fn is_pooled(&self, path: impl AsRef<Path>) -> bool {
      ResourceKey::new(path).is_ok_and(|key| self.pool.contains(&key))
   }
}
