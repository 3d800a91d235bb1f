//! Error type for page storage backends.

use thiserror::Error;

/// Errors surfaced by [`PageStorage`] implementations.
///
/// [`PageStorage`]: crate::store::PageStorage
#[derive(Debug, Error)]
pub enum StorageError {
    /// A looked-up commit, object, or entry does not exist.
    ///
    /// This is an expected outcome for entry lookups and is surfaced to
    /// callers rather than swallowed.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// An operation was attempted on a journal that has already been
    /// committed or rolled back.
    #[error("journal is no longer open")]
    JournalClosed,

    /// The backend detected an inconsistency in its own data.
    #[error("storage backend error: {0}")]
    Corrupt(String),

    /// Generic I/O wrapper for disk-backed implementations.
    #[error("storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StorageError {
    /// Returns `true` for the expected missing-key/missing-commit outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    pub(crate) fn commit_not_found(id: impl ToString) -> Self {
        StorageError::NotFound {
            entity: "commit",
            id: id.to_string(),
        }
    }

    pub(crate) fn object_not_found(id: impl ToString) -> Self {
        StorageError::NotFound {
            entity: "object",
            id: id.to_string(),
        }
    }

    pub(crate) fn entry_not_found(key: &[u8]) -> Self {
        StorageError::NotFound {
            entity: "entry",
            id: String::from_utf8_lossy(key).into_owned(),
        }
    }
}
