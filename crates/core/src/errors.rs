//! Error types for the Converge core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type.

use converge_storage::StorageError;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

/// Errors from ancestor search, merge strategies, and the merge resolver.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Underlying storage failure during a merge step.
    #[error("merge storage error: {0}")]
    Storage(#[from] StorageError),

    /// The in-flight merge was cancelled before completing.
    #[error("merge was cancelled")]
    Cancelled,

    /// The external resolver violated the result-provider protocol.
    #[error("resolver protocol error: {0}")]
    Protocol(String),

    /// Invariant violation, or a continuation observed its owner destroyed.
    #[error("internal merge error: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = MergeError::Cancelled;
        assert_eq!(err.to_string(), "merge was cancelled");

        let err = MergeError::Protocol("merge after done".into());
        assert_eq!(err.to_string(), "resolver protocol error: merge after done");

        let err = ConfigError::InvalidValue {
            field: "sync.server_id".into(),
            detail: "must not be empty".into(),
        };
        assert!(err.to_string().contains("sync.server_id"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let merge_err = MergeError::Internal("oops".into());
        let core_err: CoreError = merge_err.into();
        assert!(matches!(core_err, CoreError::Merge(_)));

        let storage_err = StorageError::JournalClosed;
        let merge_err: MergeError = storage_err.into();
        assert!(matches!(merge_err, MergeError::Storage(_)));
    }
}
