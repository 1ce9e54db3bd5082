use std::path::PathBuf;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the tile cache store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from the connection manager.
   #[error(transparent)]
   ConnectionManager(#[from] sqlx_sqlite_file_pool::Error),

   /// I/O error while staging files.
   #[error("io error: {0}")]
   Io(#[from] std::io::Error),

   /// Configuration could not be parsed.
   #[error("invalid configuration: {0}")]
   Config(#[from] serde_json::Error),

   /// No SQLite store is associated with the layer.
   #[error("no SQLite store could be associated with layer '{0}'")]
   UnknownLayer(String),

   /// Neither an upload nor an existing source path was provided.
   #[error("provided file is missing or does not exist")]
   MissingSource,

   /// A single file was provided without a destination.
   #[error("destination is required for single files")]
   MissingDestination,

   /// Destination is absolute or escapes the store root.
   #[error("destination '{}' must be a relative path inside the store", .0.display())]
   InvalidDestination(PathBuf),

   /// The uploaded zip archive could not be read.
   #[error("invalid zip archive: {0}")]
   Archive(#[from] zip::result::ZipError),

   /// A zip entry would be extracted outside the staging directory.
   #[error("zip entry '{0}' escapes the extraction directory")]
   UnsafeArchiveEntry(String),
}

impl Error {
   /// Whether the error was caused by the request rather than the server.
   pub fn is_bad_request(&self) -> bool {
      match self {
         Error::UnknownLayer(_)
         | Error::MissingSource
         | Error::MissingDestination
         | Error::InvalidDestination(_)
         | Error::UnsafeArchiveEntry(_) => true,
         Error::Archive(e) => !matches!(e, zip::result::ZipError::Io(_)),
         _ => false,
      }
   }
}
