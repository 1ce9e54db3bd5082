//! Tile store backed by a directory of SQLite databases

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx_sqlite_file_pool::{AccessMode, BoxError, PooledConnection, SqliteConnectionManager};
use tracing::debug;

use crate::config::StoreConfig;
use crate::{Error, Result};

/// A tile store: a directory of SQLite databases served through one
/// connection manager.
///
/// Callers address databases by their path relative to the store root. The
/// manager can be shared between stores.
#[derive(Clone)]
pub struct SqliteStore {
   root: PathBuf,
   manager: Arc<SqliteConnectionManager>,
}

impl SqliteStore {
   /// Create the store described by `config`, with its own manager
   pub async fn open(config: StoreConfig) -> Result<Self> {
      let manager = Arc::new(SqliteConnectionManager::new(config.pool));
      Self::with_manager(config.root_directory, manager).await
   }

   /// Create a store rooted at `root` that shares an existing manager.
   ///
   /// The root directory is created when missing.
   pub async fn with_manager(
      root: impl Into<PathBuf>,
      manager: Arc<SqliteConnectionManager>,
   ) -> Result<Self> {
      let root = std::path::absolute(root.into())?;
      tokio::fs::create_dir_all(&root).await?;
      debug!(root = %root.display(), "Opened SQLite store");

      Ok(Self { root, manager })
   }

   pub fn root(&self) -> &Path {
      &self.root
   }

   pub fn manager(&self) -> &Arc<SqliteConnectionManager> {
      &self.manager
   }

   /// Absolute path of the database at `relative` inside the store
   pub fn resolve(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
      let relative = relative.as_ref();
      let escapes = relative.as_os_str().is_empty()
         || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));

      if escapes {
         return Err(Error::InvalidDestination(relative.to_path_buf()));
      }
      Ok(self.root.join(relative))
   }

   /// Run `work` against the database at `relative`
   pub async fn do_work<T, E, F>(&self, relative: impl AsRef<Path>, mode: AccessMode, work: F) -> Result<T>
   where
      F: for<'c> FnOnce(&'c PooledConnection) -> BoxFuture<'c, std::result::Result<T, E>>,
      E: Into<BoxError>,
   {
      let path = self.resolve(relative)?;
      Ok(self.manager.do_work(path, mode, work).await?)
   }

   /// Replace the database at `destination` with the file at `source`
   pub async fn replace_file(&self, source: impl AsRef<Path>, destination: impl AsRef<Path>) -> Result<()> {
      let target = self.resolve(destination)?;
      self.manager.replace(source, target).await?;
      Ok(())
   }

   /// Replace every database that has a counterpart at the same relative
   /// path under `source_dir`. Returns the number of files replaced.
   pub async fn replace_directory(&self, source_dir: impl AsRef<Path>) -> Result<usize> {
      Ok(self.manager.replace_dir(source_dir, &self.root).await?)
   }

   /// Delete the database at `relative`. Returns whether it existed.
   pub async fn remove(&self, relative: impl AsRef<Path>) -> Result<bool> {
      let path = self.resolve(relative)?;
      Ok(self.manager.remove(path).await?)
   }

   /// Close every pooled connection
   pub async fn close(&self) -> Result<()> {
      self.manager.reap_all().await?;
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use tempfile::TempDir;

   async fn create_test_store() -> (SqliteStore, TempDir) {
      let temp_dir = TempDir::new().expect("Failed to create temp directory");
      let store = SqliteStore::open(StoreConfig::new(temp_dir.path().join("cache")))
         .await
         .expect("Failed to open test store");

      (store, temp_dir)
   }

   async fn write_name(store: &SqliteStore, relative: &str, name: &'static str) {
      store
         .do_work(relative, AccessMode::Exclusive, |conn| {
            Box::pin(async move {
               let mut conn = conn.lock().await;
               sqlx::query("CREATE TABLE IF NOT EXISTS metadata (name TEXT PRIMARY KEY, value TEXT)")
                  .execute(&mut *conn)
                  .await?;
               sqlx::query("INSERT OR REPLACE INTO metadata VALUES ('name', ?)")
                  .bind(name)
                  .execute(&mut *conn)
                  .await
            })
         })
         .await
         .unwrap();
   }

   async fn read_name(store: &SqliteStore, relative: &str) -> Option<String> {
      store
         .do_work(relative, AccessMode::Shared, |conn| {
            Box::pin(async move {
               let mut conn = conn.lock().await;
               sqlx::query_scalar::<_, String>("SELECT value FROM metadata WHERE name = 'name'")
                  .fetch_optional(&mut *conn)
                  .await
            })
         })
         .await
         .unwrap()
   }

   #[tokio::test]
   async fn test_databases_live_under_root() {
      let (store, _temp) = create_test_store().await;

      write_name(&store, "EPSG_900913/5/europe.sqlite", "europe").await;

      assert!(store.root().join("EPSG_900913/5/europe.sqlite").exists());
      assert_eq!(
         read_name(&store, "EPSG_900913/5/europe.sqlite").await.as_deref(),
         Some("europe")
      );

      store.close().await.unwrap();
      assert_eq!(store.manager().pool_size(), 0);
   }

   #[tokio::test]
   async fn test_destinations_outside_root_are_rejected() {
      let (store, _temp) = create_test_store().await;

      for bad in ["", "../outside.sqlite", "a/../../b.sqlite"] {
         let err = store.resolve(bad).unwrap_err();
         assert!(err.is_bad_request(), "{bad} should be rejected");
      }

      let absolute = store.root().join("x.sqlite");
      assert!(matches!(store.resolve(&absolute), Err(Error::InvalidDestination(_))));
   }

   #[tokio::test]
   async fn test_replace_file_and_remove() {
      let (store, temp) = create_test_store().await;
      write_name(&store, "tiles.sqlite", "old").await;

      // Stage a replacement outside the store
      let staged = SqliteStore::open(StoreConfig::new(temp.path().join("staging")))
         .await
         .unwrap();
      write_name(&staged, "tiles.sqlite", "new").await;
      staged.close().await.unwrap();

      store
         .replace_file(staged.root().join("tiles.sqlite"), "tiles.sqlite")
         .await
         .unwrap();
      assert_eq!(read_name(&store, "tiles.sqlite").await.as_deref(), Some("new"));

      assert!(store.remove("tiles.sqlite").await.unwrap());
      assert!(!store.root().join("tiles.sqlite").exists());
   }
}
