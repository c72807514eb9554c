//! Error types for version edits and manifest replay.

use std::io;
use thiserror::Error;

/// Result type alias for version edit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for version edit, manifest and version set operations.
///
/// Broken producer invariants (a file whose smallest sequence exceeds its
/// largest, a column family edit that also carries files) are not errors:
/// they panic at the call site. Everything here is either bad persisted
/// data or an environment failure.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// I/O error from file operations.
    #[error("I/O error: {0}")]
    Io(String),

    /// Persisted data failed validation.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// CRC checksum mismatch.
    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// Database already exists when trying to create.
    #[error("Database already exists at: {0}")]
    DatabaseExists(String),

    /// Database not found when trying to open.
    #[error("Database not found at: {0}")]
    DatabaseNotFound(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Column family name already in use.
    #[error("Column family already exists: {0}")]
    ColumnFamilyExists(String),

    /// Column family lookup failed.
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Manifest error.
    #[error("Manifest error: {0}")]
    ManifestError(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Create a corruption error with the given message.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    /// Create a manifest error.
    pub fn manifest<S: Into<String>>(msg: S) -> Self {
        Error::ManifestError(msg.into())
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Check if this error indicates corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_) | Error::CrcMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("bad data");
        assert_eq!(format!("{}", err), "Corruption detected: bad data");

        let err = Error::CrcMismatch {
            expected: 0x10,
            actual: 0x20,
        };
        assert_eq!(format!("{}", err), "CRC mismatch: expected 0x10, got 0x20");
    }

    #[test]
    fn test_error_is_corruption() {
        assert!(Error::corruption("bad").is_corruption());
        assert!(Error::CrcMismatch {
            expected: 1,
            actual: 2
        }
        .is_corruption());
        assert!(!Error::manifest("no writer").is_corruption());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
