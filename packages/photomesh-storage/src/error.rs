//! Error types for photomesh-storage

use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Store (or the probed location) cannot be reached, e.g. share not mounted
    Unreachable,
    /// Path does not exist
    NotFound,
    /// Exclusive create hit an existing entry
    AlreadyExists,
    /// Entry exists but could not be read
    Unreadable,
    /// Glob pattern rejected by the matcher
    InvalidPattern,
    /// Serialization/deserialization errors
    Serialization,
    /// Any other I/O failure (permission, disk full, partial write)
    IO,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unreachable => "unreachable",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::Unreadable => "unreadable",
            ErrorKind::InvalidPattern => "invalid_pattern",
            ErrorKind::Serialization => "serialization",
            ErrorKind::IO => "io",
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
    pub fn unreachable(path: &Path) -> Self {
        Self::new(
            ErrorKind::Unreachable,
            format!("Storage location not reachable: {}", path.display()),
        )
    }

    pub fn not_found(path: &Path) -> Self {
        Self::new(
            ErrorKind::NotFound,
            format!("Path not found: {}", path.display()),
        )
    }

    pub fn already_exists(path: &Path) -> Self {
        Self::new(
            ErrorKind::AlreadyExists,
            format!("Path already exists: {}", path.display()),
        )
    }

    pub fn unreadable(path: &Path) -> Self {
        Self::new(
            ErrorKind::Unreadable,
            format!("Entry not readable: {}", path.display()),
        )
    }

    pub fn invalid_pattern(pattern: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::InvalidPattern,
            format!("Invalid pattern '{}': {}", pattern, reason),
        )
    }

    pub fn io(path: &Path, err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            _ => ErrorKind::IO,
        };
        Self::new(kind, format!("{}: {}", path.display(), err)).with_source(err)
    }

    pub fn is_unreachable(&self) -> bool {
        self.kind == ErrorKind::Unreachable
    }
}

// JSON error conversions
impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::new(ErrorKind::Serialization, format!("JSON error: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn test_unreachable_display() {
        let err = StorageError::unreachable(&PathBuf::from("/mnt/share"));
        let msg = format!("{}", err);
        assert!(msg.contains("[unreachable]"));
        assert!(msg.contains("/mnt/share"));
        assert!(err.is_unreachable());
    }

    #[test]
    fn test_io_error_maps_kind() {
        let path = PathBuf::from("/tmp/x");

        let err = StorageError::io(&path, io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.kind, ErrorKind::NotFound);

        let err = StorageError::io(&path, io::Error::new(io::ErrorKind::AlreadyExists, "dup"));
        assert_eq!(err.kind, ErrorKind::AlreadyExists);

        let err = StorageError::io(&path, io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        assert_eq!(err.kind, ErrorKind::IO);
        assert!(!err.is_unreachable());
    }

    #[test]
    fn test_with_source() {
        let io_err = io::Error::new(io::ErrorKind::Other, "disk full");
        let err = StorageError::io(&PathBuf::from("/data/out.ply"), io_err);

        let source = err.source().unwrap();
        assert!(source.to_string().contains("disk full"));
    }

    #[test]
    fn test_error_kind_as_str() {
        assert_eq!(ErrorKind::Unreachable.as_str(), "unreachable");
        assert_eq!(ErrorKind::NotFound.as_str(), "not_found");
        assert_eq!(ErrorKind::AlreadyExists.as_str(), "already_exists");
        assert_eq!(ErrorKind::Unreadable.as_str(), "unreadable");
        assert_eq!(ErrorKind::InvalidPattern.as_str(), "invalid_pattern");
        assert_eq!(ErrorKind::Serialization.as_str(), "serialization");
        assert_eq!(ErrorKind::IO.as_str(), "io");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json")
            .err()
            .unwrap();
        let err: StorageError = json_err.into();

        assert_eq!(err.kind, ErrorKind::Serialization);
        assert!(err.message.contains("JSON error"));
        assert!(err.source.is_some());
    }
}
