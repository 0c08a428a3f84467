//! Typed errors for the result store.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The persisted file exists but could not be read or decoded.
    /// Callers recover by treating the collection as empty.
    #[error("result store {path} is corrupt: {reason}")]
    StorageCorrupt { path: PathBuf, reason: String },

    /// The store could not be locked or written. Fatal for the operation.
    #[error("failed to write result store {path}: {source}")]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A single candidate record was rejected; the rest of the batch continues.
    #[error("invalid record #{index}: {reason}")]
    InvalidRecord { index: usize, reason: String },
}

impl StoreError {
    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::StorageWrite {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StoreError::StorageCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
