use std::io;
use std::path::PathBuf;
use std::result;

use thiserror::Error;

/// Custom result type for database operations
pub type Result<T> = result::Result<T, Error>;

/// Database error codes
#[derive(Debug, Error)]
pub enum Error {
    /// No record or directory at the resolved path
    #[error("No such record or directory: {}", .0.display())]
    NotFound(PathBuf),
    /// A path component that must be a directory is a record, or vice versa
    #[error("Invalid path, record and directory overlap: {}", .0.display())]
    InvalidPath(PathBuf),
    /// Key contains a reserved or traversal component
    #[error("Invalid component {component:?} in key {key:?}")]
    InvalidKey { key: String, component: String },
    /// Record shrank while it was being read
    #[error("Short read on {}: expected {expected} bytes, got {actual}", .path.display())]
    ShortRead {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
    /// Backing lock file could not be opened or locked
    #[error("Lock error on {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A shard level was empty while descending a numeric chain
    #[error("Shard directory has no numeric entries: {}", .0.display())]
    BrokenShard(PathBuf),
    /// Mutation attempted through a read-only handle
    #[error("Database is read-only")]
    ReadOnly,
    /// Other I/O failure (rename, permission, disk full)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True for the `NotFound` variant
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Map an io error on `path`, turning `ENOENT`/`ENOTDIR` into `NotFound`
    pub(crate) fn from_io(err: io::Error, path: impl Into<PathBuf>) -> Error {
        match err.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path.into()),
            _ if err.raw_os_error() == Some(libc::ENOTDIR) => Error::NotFound(path.into()),
            _ => Error::Io(err),
        }
    }
}
