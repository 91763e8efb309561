//! Error types for ringsync
//!
//! Defines the error taxonomy used across the local copy pipeline and the
//! network endpoints: kernel I/O failures, connection and protocol errors,
//! key-derivation failures, and configuration problems.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ringsync operations
#[derive(Error, Debug)]
pub enum RingSyncError {
    /// I/O error during file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// io_uring setup or submission error
    #[error("ring error: {0}")]
    Ring(#[source] std::io::Error),

    /// Network connection error
    #[error("connection error to '{host}': {message}")]
    Connection { host: String, message: String },

    /// Wire protocol violation (bad frame, unexpected type, unsafe path)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Pre-shared secret mismatch or handshake rejection
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Key derivation or kTLS installation failure
    #[error("transport encryption error: {0}")]
    Crypto(String),

    /// Invalid command-line arguments or option combination
    #[error("configuration error: {0}")]
    Config(String),

    /// Source tree enumeration failure
    #[error("scan error: {0}")]
    Scan(String),

    /// Operation not supported on this kernel
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl RingSyncError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a connection error
    pub fn connection(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Result type alias for ringsync operations
pub type Result<T> = std::result::Result<T, RingSyncError>;

/// Extension trait for converting std::io errors with path context
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| RingSyncError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RingSyncError::io("/some/file", std::io::Error::from_raw_os_error(libc::ENOENT));
        let msg = err.to_string();
        assert!(msg.contains("/some/file"));

        let err = RingSyncError::connection("host:9999", "refused");
        assert!(err.to_string().contains("host:9999"));
    }

    #[test]
    fn test_with_path_ext() {
        let res: std::io::Result<()> = Err(std::io::Error::from_raw_os_error(libc::EACCES));
        let err = res.with_path("/denied").unwrap_err();
        assert!(matches!(err, RingSyncError::Io { .. }));
    }
}
