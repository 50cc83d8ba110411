//! Error types for datapipe-storage

use std::fmt;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller supplied an unusable key or bucket name
    InvalidArgument,
    /// Object store unreachable, or a request to it failed
    Unavailable,
    /// Request exceeded the client timeout
    Timeout,
    /// Bucket or object does not exist
    NotFound,
    /// Resource already exists (treated as success during provisioning)
    AlreadyExists,
    /// Bucket provisioning failed
    Provisioning,
    /// Upload failed after exhausting the retry budget
    WriteFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::Provisioning => "provisioning",
            ErrorKind::WriteFailed => "write_failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, format!("Not found: {}", what.into()))
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::AlreadyExists,
            format!("Already exists: {}", what.into()),
        )
    }

    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Provisioning, message)
    }

    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WriteFailed, message)
    }

    /// Whether a repeated attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Unavailable | ErrorKind::Timeout)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_display() {
        let err = StorageError::not_found("raw/orders/20240101000000.json");
        let msg = format!("{}", err);
        assert!(msg.contains("not_found"));
        assert!(msg.contains("raw/orders/20240101000000.json"));
    }

    #[test]
    fn test_unavailable_error() {
        let err = StorageError::unavailable("connection refused");
        assert_eq!(err.kind, ErrorKind::Unavailable);
        assert_eq!(err.message, "connection refused");
        assert!(err.source.is_none());
        assert_eq!(format!("{}", err), "[unavailable] connection refused");
        assert!(err.is_transient());
    }

    #[test]
    fn test_write_failed_is_not_transient() {
        let err = StorageError::write_failed("gave up after 3 attempts");
        assert_eq!(err.kind, ErrorKind::WriteFailed);
        assert!(!err.is_transient());
        assert_eq!(format!("{}", err), "[write_failed] gave up after 3 attempts");
    }

    #[test]
    fn test_with_source() {
        use std::io;

        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err = StorageError::unavailable("put failed").with_source(io_err);

        assert_eq!(err.kind, ErrorKind::Unavailable);
        let source = err.source().unwrap();
        assert!(source.to_string().contains("reset by peer"));
    }

    #[test]
    fn test_error_kind_as_str() {
        assert_eq!(ErrorKind::InvalidArgument.as_str(), "invalid_argument");
        assert_eq!(ErrorKind::AlreadyExists.as_str(), "already_exists");
        assert_eq!(ErrorKind::Provisioning.as_str(), "provisioning");
        assert_eq!(ErrorKind::WriteFailed.as_str(), "write_failed");
    }

    #[test]
    fn test_result_propagation() {
        fn inner() -> Result<()> {
            Err(StorageError::timeout("put exceeded 30s"))
        }

        fn outer() -> Result<()> {
            inner()?;
            Ok(())
        }

        let err = outer().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }
}
