use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Unified error type for version management and the read path.
///
/// `Clone` so that one failure can be reported to every writer of a
/// manifest group commit; I/O errors are shared behind an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// IO error from disk operations.
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),
    /// Data corruption detected (CRC mismatch, bad format, inconsistent metadata).
    #[error("Corruption: {0}")]
    Corruption(String),
    /// Key not found.
    #[error("NotFound")]
    NotFound,
    /// The operation needed I/O that the read tier forbids.
    #[error("Incomplete: {0}")]
    Incomplete(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// A batch limit was exceeded before the key was served.
    #[error("Operation aborted: {0}")]
    Aborted(String),
    #[error("Not supported: {0}")]
    NotSupported(String),
    #[error("Column family dropped")]
    ColumnFamilyDropped,
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::Incomplete(_))
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
