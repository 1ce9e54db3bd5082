//! Error types for sqlx-sqlite-file-pool

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by a unit of work
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that may occur when working with sqlx-sqlite-file-pool
#[derive(Error, Debug)]
pub enum Error {
   /// The file could not be opened as a SQLite database (corrupt, wrong
   /// permissions, not a database, disk full). Never retried by the manager.
   #[error("failed to open database '{}': {source}", path.display())]
   Connection {
      path: PathBuf,
      #[source]
      source: sqlx::Error,
   },

   /// The caller-supplied unit of work failed. Pool and lock state are
   /// consistent when this is returned.
   #[error("work on '{}' failed: {source}", path.display())]
   Work {
      path: PathBuf,
      #[source]
      source: BoxError,
   },

   /// A forced close could not complete because work on the file did not
   /// finish within the drain timeout
   #[error("database '{}' still in use after waiting {waited:?}", path.display())]
   PoolBusy { path: PathBuf, waited: Duration },

   /// The file-system move of a replace failed; the target is unchanged
   #[error(
      "failed to replace '{}' with '{}': {cause}",
      target.display(),
      source_path.display()
   )]
   Replace {
      source_path: PathBuf,
      target: PathBuf,
      #[source]
      cause: std::io::Error,
   },

   /// A directory replace stopped part way. Files replaced before the
   /// failure keep their new content.
   #[error("directory replace stopped after {replaced} of {total} files: {cause}")]
   PartialReplace {
      replaced: usize,
      total: usize,
      #[source]
      cause: Box<Error>,
   },

   /// Exclusive access was requested on a file the current task only holds
   /// shared
   #[error("cannot upgrade shared lock on '{}' to exclusive", path.display())]
   LockUpgrade { path: PathBuf },

   /// Deleting a database file failed
   #[error("failed to remove '{}': {cause}", path.display())]
   Remove {
      path: PathBuf,
      #[source]
      cause: std::io::Error,
   },

   /// IO error when resolving a database path. Standard library IO errors
   /// are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
