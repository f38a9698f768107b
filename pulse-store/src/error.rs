//! Error types for pulse-store.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from storage operations.
///
/// Two classes matter to callers: *unavailable* (I/O, connectivity, pool —
/// the scope's sync aborts, others continue) and *corrupt* (persisted
/// content unreadable — readers may degrade to an empty series, writers
/// never mask it). [`StoreError::is_corrupt`] distinguishes them.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisted file content failed to parse.
    #[error("corrupt store content at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A persisted row failed to decode.
    #[error("corrupt row for {context}: {message}")]
    CorruptRow { context: String, message: String },

    /// Database connectivity or statement failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization error on the write path.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// True for malformed-persisted-content errors, which explicit readers
    /// may degrade to "series empty".
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            StoreError::Corrupt { .. } | StoreError::CorruptRow { .. }
        )
    }
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`StoreError::Corrupt`].
pub(crate) fn corrupt_err(path: impl Into<PathBuf>, source: serde_json::Error) -> StoreError {
    StoreError::Corrupt {
        path: path.into(),
        source,
    }
}
