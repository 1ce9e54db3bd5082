//! Canonical identity of a pooled database file

use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::Result;

/// Identifies one pooled database by its normalized absolute path.
///
/// Relative paths are resolved against the process working directory and
/// `.`/`..` components are folded away lexically, so `tiles/./a.sqlite` and
/// `/srv/cache/tiles/a.sqlite` name the same key when run from `/srv/cache`.
/// The file does not need to exist and symlinks are not followed.
///
/// Keys are ordered by path. That order is the global lock order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey(PathBuf);

impl ResourceKey {
   /// Build the key for `path`
   pub fn new(path: impl AsRef<Path>) -> Result<Self> {
      let absolute = std::path::absolute(path.as_ref())?;
      Ok(Self(normalize(&absolute)))
   }

   pub fn path(&self) -> &Path {
      &self.0
   }

   pub fn into_path_buf(self) -> PathBuf {
      self.0
   }
}

impl AsRef<Path> for ResourceKey {
   fn as_ref(&self) -> &Path {
      &self.0
   }
}

impl fmt::Display for ResourceKey {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      self.0.display().fmt(f)
   }
}

fn normalize(path: &Path) -> PathBuf {
   let mut normalized = PathBuf::new();
   for component in path.components() {
      match component {
         Component::CurDir => {}
         // `pop` refuses to remove the root, so `/..` stays `/`
         Component::ParentDir => {
            normalized.pop();
         }
         other => normalized.push(other.as_os_str()),
      }
   }
   normalized
}
