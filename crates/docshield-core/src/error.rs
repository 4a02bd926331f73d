//! Error types shared by every docshield component.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShieldError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Wrong password and corrupted ciphertext are deliberately reported the same way.
    #[error("incorrect password or corrupted file")]
    AuthenticationFailure,

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("no document loaded")]
    NoDocumentLoaded,

    #[error("search term must not be empty")]
    EmptySearchTerm,

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("quarantine of {} failed: {reason}", path.display())]
    QuarantineFailure { path: PathBuf, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("page {index} out of range (document has {count} pages)")]
    PageOutOfRange { index: usize, count: usize },

    #[error("document adapter error: {0}")]
    Adapter(String),

    #[error("external tool failed: {0}")]
    ExternalTool(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

impl ShieldError {
    /// Attach a path to an IO error. `NotFound` becomes [`ShieldError::FileNotFound`].
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == io::ErrorKind::NotFound {
            ShieldError::FileNotFound(path)
        } else {
            ShieldError::Io { path, source }
        }
    }

    /// Environment failures may be retried by the caller; crypto and misuse errors never.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShieldError::Io { .. } | ShieldError::QuarantineFailure { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ShieldError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_file_not_found() {
        let err = ShieldError::io("/nope", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, ShieldError::FileNotFound(ref p) if p == Path::new("/nope")));
        assert!(!err.is_retryable());
    }

    #[test]
    fn other_io_errors_keep_path_and_are_retryable() {
        let err = ShieldError::io("/locked", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("/locked"));
    }

    #[test]
    fn authentication_failure_does_not_leak_cause() {
        assert_eq!(
            ShieldError::AuthenticationFailure.to_string(),
            "incorrect password or corrupted file"
        );
        assert!(!ShieldError::AuthenticationFailure.is_retryable());
    }
}
