//! Error types for qualscan

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for qualscan operations
///
/// Kinds that are absorbed rather than surfaced (detector failures, stream
/// I/O) still travel through this enum internally; the absorbing layer
/// converts them into synthetic findings or status counters.
#[derive(Error, Debug)]
pub enum QualscanError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("resource exhausted: {what}, retry after {retry_after_ms} ms")]
    ResourceExhausted { what: String, retry_after_ms: u64 },

    #[error("deadline of {0} ms elapsed")]
    Timeout(u64),

    #[error("detector {name} failed: {message}")]
    DetectorFailure { name: String, message: String },

    #[error("unknown detector: {0}")]
    UnknownDetector(String),

    #[error("failed to construct detector {name}: {message}")]
    DetectorConstruction { name: String, message: String },

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("empty source: {0}")]
    EmptySource(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("task {0} is busy")]
    TaskBusy(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error at {path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("profile file error: {0}")]
    ProfileFile(#[from] serde_yaml::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl QualscanError {
    /// Transient stream-side errors that a worker absorbs into its
    /// status/counters instead of surfacing to callers.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QualscanError::SourceUnavailable(_) | QualscanError::ConnectionLost(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, QualscanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let err = QualscanError::DetectorFailure {
            name: "blur".to_string(),
            message: "bad frame".to_string(),
        };
        assert_eq!(err.to_string(), "detector blur failed: bad frame");
    }

    #[test]
    fn test_transient_classification() {
        assert!(QualscanError::ConnectionLost("reset".into()).is_transient());
        assert!(QualscanError::SourceUnavailable("gone".into()).is_transient());
        assert!(!QualscanError::TaskBusy("t1".into()).is_transient());
        assert!(!QualscanError::Timeout(100).is_transient());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: QualscanError = io.into();
        assert!(matches!(err, QualscanError::Io(_)));
    }
}
