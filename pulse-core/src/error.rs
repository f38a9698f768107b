//! Error types for pulse-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from tenant directory operations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (write/save path).
    #[error("tenant file JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON parse error on load — includes the file path.
    #[error("failed to parse tenant file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A backing store reported a failure (connectivity, pool).
    #[error("tenant directory unavailable: {0}")]
    Unavailable(String),
}

/// Convenience constructor for [`DirectoryError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DirectoryError {
    DirectoryError::Io {
        path: path.into(),
        source,
    }
}
