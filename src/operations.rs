//! Replace operation handler
//!
//! The transport-independent part of a "replace the databases of a layer"
//! request: find the layer's store, stage the provided content, unpack zip
//! archives, dispatch to a single-file or directory replace, and map the
//! outcome to a status.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, error};
use uuid::Uuid;
use zip::ZipArchive;

use crate::store::SqliteStore;
use crate::{Error, Result};

/// Finds the SQLite store backing a layer
pub trait StoreResolver: Send + Sync {
   /// The store for `layer`, or `None` when the layer has no SQLite store
   fn store_for_layer(&self, layer: &str) -> Option<SqliteStore>;
}

/// A replace request.
///
/// The content comes either from `upload` (raw bytes of a single database
/// or of a zip archive) or from `source`, an existing file, zip archive or
/// directory on the server. Uploads win when both are present. Archives are
/// extracted and replaced like a directory, so `destination` is ignored for
/// them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplaceRequest {
   pub layer: String,
   /// Store-relative path of the database to replace; required for single files
   pub destination: Option<PathBuf>,
   pub source: Option<PathBuf>,
   #[serde(skip)]
   pub upload: Option<Vec<u8>>,
}

/// Outcome class of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
   Ok,
   BadRequest,
   InternalError,
}

impl OperationStatus {
   pub fn http_code(self) -> u16 {
      match self {
         OperationStatus::Ok => 200,
         OperationStatus::BadRequest => 400,
         OperationStatus::InternalError => 500,
      }
   }
}

/// Response for a [`ReplaceRequest`]
#[derive(Debug, Clone, Serialize)]
pub struct ReplaceResponse {
   pub status: OperationStatus,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub message: Option<String>,
}

impl ReplaceResponse {
   fn ok() -> Self {
      Self {
         status: OperationStatus::Ok,
         message: None,
      }
   }

   fn from_error(e: &Error) -> Self {
      let status = if e.is_bad_request() {
         OperationStatus::BadRequest
      } else {
         OperationStatus::InternalError
      };
      Self {
         status,
         message: Some(e.to_string()),
      }
   }
}

/// Executes replace requests against the stores a resolver knows about
pub struct ReplaceOperation<R> {
   resolver: R,
}

impl<R: StoreResolver> ReplaceOperation<R> {
   pub fn new(resolver: R) -> Self {
      Self { resolver }
   }

   /// Execute `request`; never fails, errors are reported in the response
   pub async fn execute(&self, request: ReplaceRequest) -> ReplaceResponse {
      match self.try_execute(request).await {
         Ok(()) => ReplaceResponse::ok(),
         Err(e) => {
            if !e.is_bad_request() {
               error!(error = %e, "Error executing the replace operation");
            }
            ReplaceResponse::from_error(&e)
         }
      }
   }

   async fn try_execute(&self, request: ReplaceRequest) -> Result<()> {
      let store = self
         .resolver
         .store_for_layer(&request.layer)
         .ok_or_else(|| Error::UnknownLayer(request.layer.clone()))?;

      // Removed with everything staged in it when this function returns
      let working_dir = tempfile::Builder::new().prefix("replace-operation-").tempdir()?;

      let source = match (request.upload, request.source) {
         (Some(bytes), _) if !bytes.is_empty() => stage_upload(&bytes, &working_dir).await?,
         (_, Some(path)) => path,
         _ => return Err(Error::MissingSource),
      };

      match tokio::fs::metadata(&source).await {
         Ok(_) => {}
         Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::MissingSource),
         Err(e) => return Err(e.into()),
      }

      let source = unzip_if_needed(source, working_dir.path()).await?;

      if tokio::fs::metadata(&source).await?.is_dir() {
         let replaced = store.replace_directory(&source).await?;
         debug!(layer = %request.layer, replaced, "Replaced layer databases from directory");
      } else {
         let destination = request.destination.ok_or(Error::MissingDestination)?;
         store.replace_file(&source, &destination).await?;
         debug!(layer = %request.layer, destination = %destination.display(), "Replaced layer database");
      }

      Ok(())
   }
}

async fn stage_upload(bytes: &[u8], working_dir: &TempDir) -> Result<PathBuf> {
   let path = working_dir.path().join(Uuid::new_v4().to_string());
   tokio::fs::write(&path, bytes).await?;
   debug!(path = %path.display(), size = bytes.len(), "Staged uploaded file");
   Ok(path)
}

/// Extract `source` into a fresh directory under `working_dir` when it is a
/// zip archive, otherwise hand it back as is
async fn unzip_if_needed(source: PathBuf, working_dir: &Path) -> Result<PathBuf> {
   let output = working_dir.join(Uuid::new_v4().to_string());

   tokio::task::spawn_blocking(move || -> Result<PathBuf> {
      if source.is_dir() || !is_zip_archive(&source)? {
         return Ok(source);
      }

      fs::create_dir(&output)?;
      let extracted = extract_archive(&source, &output)?;
      debug!(archive = %source.display(), extracted, "Extracted zip archive");
      Ok(output)
   })
   .await
   .map_err(io::Error::other)?
}

/// Whether `path` starts with a zip local file header (or is an empty archive)
fn is_zip_archive(path: &Path) -> io::Result<bool> {
   let mut magic = [0u8; 4];
   match File::open(path)?.read_exact(&mut magic) {
      Ok(()) => Ok(matches!(&magic, b"PK\x03\x04" | b"PK\x05\x06")),
      Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
      Err(e) => Err(e),
   }
}

/// Unpack every entry of `archive` below `output`. Entries with absolute
/// paths or `..` components are rejected before anything is written for
/// them. Returns the number of files extracted.
fn extract_archive(archive: &Path, output: &Path) -> Result<usize> {
   let mut archive = ZipArchive::new(File::open(archive)?)?;
   let mut extracted = 0;

   for index in 0..archive.len() {
      let mut entry = archive.by_index(index)?;
      let Some(relative) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
         return Err(Error::UnsafeArchiveEntry(entry.name().to_string()));
      };

      let path = output.join(relative);
      if entry.is_dir() {
         fs::create_dir_all(&path)?;
         continue;
      }
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }
      io::copy(&mut entry, &mut File::create(&path)?)?;
      extracted += 1;
   }

   Ok(extracted)
}

impl<F> StoreResolver for F
where
   F: Fn(&str) -> Option<SqliteStore> + Send + Sync,
{
   fn store_for_layer(&self, layer: &str) -> Option<SqliteStore> {
      self(layer)
   }
}

/// Resolver that serves every layer from one store, handy for single-store
/// deployments
pub struct SingleStore(pub SqliteStore);

impl StoreResolver for SingleStore {
   fn store_for_layer(&self, _layer: &str) -> Option<SqliteStore> {
      Some(self.0.clone())
   }
}
