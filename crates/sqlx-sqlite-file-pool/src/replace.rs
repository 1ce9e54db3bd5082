//! File-system side of replacing and removing database files
//!
//! These functions never touch the pool; callers hold the exclusive locks
//! and have closed any pooled connection before calling them.

use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{trace, warn};
use walkdir::WalkDir;

const SIDECAR_SUFFIXES: [&str; 3] = ["-journal", "-wal", "-shm"];

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
   let mut name = path.as_os_str().to_owned();
   name.push(suffix);
   PathBuf::from(name)
}

/// Delete the rollback journal and WAL files SQLite keeps next to `path`.
/// A stale WAL next to a replaced file would be replayed into the new one.
fn remove_sidecars(path: &Path) -> io::Result<()> {
   for suffix in SIDECAR_SUFFIXES {
      match fs::remove_file(sidecar(path, suffix)) {
         Err(e) if e.kind() != ErrorKind::NotFound => return Err(e),
         _ => {}
      }
   }
   Ok(())
}

/// Run file-system work on the blocking thread pool
pub(crate) async fn blocking<T, F>(f: F) -> io::Result<T>
where
   F: FnOnce() -> io::Result<T> + Send + 'static,
   T: Send + 'static,
{
   tokio::task::spawn_blocking(f).await.map_err(io::Error::other)?
}

/// Move `source` over `target` so that `target` is only ever seen whole.
///
/// A plain rename is used when both live on the same file system. Otherwise
/// the content is copied to a temporary file next to `target`, synced, and
/// renamed over it, after which `source` is deleted. The old file's journal
/// files are deleted once the new file is in place. On failure `target` and
/// its journal files are left untouched.
pub(crate) fn move_file(source: &Path, target: &Path) -> io::Result<()> {
   if !fs::metadata(source)?.is_file() {
      return Err(io::Error::new(
         ErrorKind::InvalidInput,
         "replacement source is not a regular file",
      ));
   }

   let parent = target
      .parent()
      .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "target has no parent directory"))?;
   fs::create_dir_all(parent)?;

   match fs::rename(source, target) {
      Ok(()) => return remove_sidecars(target),
      Err(e) if e.kind() == ErrorKind::CrossesDevices => {
         trace!(source = %source.display(), target = %target.display(), "Rename crosses devices, copying");
      }
      Err(e) => return Err(e),
   }

   let mut staged = NamedTempFile::new_in(parent)?;
   io::copy(&mut File::open(source)?, staged.as_file_mut())?;
   staged.as_file().sync_all()?;
   staged.persist(target).map_err(|e| e.error)?;
   remove_sidecars(target)?;

   if let Err(e) = fs::remove_file(source) {
      warn!(source = %source.display(), error = %e, "Failed to delete replacement source after copy");
   }
   Ok(())
}

/// Delete `target` and its sidecars. Returns whether the database file
/// existed.
pub(crate) fn remove_file(target: &Path) -> io::Result<bool> {
   let existed = match fs::remove_file(target) {
      Ok(()) => true,
      Err(e) if e.kind() == ErrorKind::NotFound => false,
      Err(e) => return Err(e),
   };
   remove_sidecars(target)?;
   Ok(existed)
}

/// Every regular file below `dir`, sorted by path, paired with its path
/// relative to `dir`
pub(crate) fn list_files(dir: &Path) -> io::Result<Vec<(PathBuf, PathBuf)>> {
   let mut files = Vec::new();
   for entry in WalkDir::new(dir).sort_by_file_name() {
      let entry = entry.map_err(io::Error::from)?;
      if !entry.file_type().is_file() {
         continue;
      }
      let relative = entry
         .path()
         .strip_prefix(dir)
         .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?
         .to_path_buf();
      files.push((entry.into_path(), relative));
   }
   Ok(files)
}
