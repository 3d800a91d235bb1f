//! Wire-shaped types exchanged with an external conflict resolver.
//!
//! An external resolver is an out-of-process decision maker. During one
//! merge it receives three read-only snapshots (left, right, ancestor) plus
//! a [`MergeResultProvider`] handle, pulls paged diffs through the handle,
//! submits batches of [`MergedValue`] decisions, and finishes with `done`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use converge_storage::{KeyPriority, ObjectId, StorageError};

use crate::merge::resolver_client::MergeResultProvider;
use crate::page::PageSnapshot;

/// Byte budget for one diff page. Bounds the inline data shipped per
/// response so a single page never exceeds a transport message.
pub const MAX_INLINE_DATA_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Status taxonomy
// ---------------------------------------------------------------------------

/// Result status surfaced to the external resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    /// More pages follow; call again with the returned token.
    PartialResult,
    /// A looked-up key or commit does not exist.
    NotFound,
    /// Invariant violation, cancelled operation, or destroyed owner.
    InternalError,
}

impl Status {
    /// Fixed mapping from storage-layer errors to resolver-visible statuses.
    pub fn from_storage_error(err: &StorageError) -> Self {
        if err.is_not_found() {
            Status::NotFound
        } else {
            Status::InternalError
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::PartialResult => write!(f, "partial_result"),
            Self::NotFound => write!(f, "not_found"),
            Self::InternalError => write!(f, "internal_error"),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge decisions
// ---------------------------------------------------------------------------

/// Payload of a [`ValueSource::New`] decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewValue {
    /// Inline bytes to be stored as a fresh object.
    Bytes(Vec<u8>),
    /// Reference to an object that already exists in storage.
    Reference { opaque_id: ObjectId },
}

/// Where the merged value for one key comes from.
///
/// `Left` is implicit: the merge journal starts from the left commit's
/// content, so untouched keys keep left's values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// Take the value the right commit has for this key.
    Right,
    /// Use a new value supplied by the resolver.
    New(NewValue),
    /// Remove the key from the merged commit.
    Delete,
}

/// One per-key decision produced by the external resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedValue {
    pub key: Vec<u8>,
    pub source: ValueSource,
    pub priority: KeyPriority,
}

// ---------------------------------------------------------------------------
// Diff pages
// ---------------------------------------------------------------------------

/// One changed entry inside a diff page, with its value inlined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub priority: KeyPriority,
}

/// One page of the diff between an ancestor commit and a side commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageChange {
    /// Keys added or modified on the side, relative to the ancestor.
    pub changes: Vec<DiffEntry>,
    /// Keys present in the ancestor but removed on the side.
    pub deletions: Vec<Vec<u8>>,
}

impl PageChange {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.deletions.is_empty()
    }
}

/// Opaque continuation token for paged diffs. `None` in a response means the
/// final page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken(pub Vec<u8>);

/// One `get_left_diff` / `get_right_diff` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffResponse {
    pub status: Status,
    pub change: Option<PageChange>,
    pub next_token: Option<PageToken>,
}

// ---------------------------------------------------------------------------
// Resolver interface
// ---------------------------------------------------------------------------

/// The external resolver's side of the merge channel.
///
/// `resolve` is invoked once per conflict. The implementation inspects the
/// snapshots and diffs, then drives `provider` to completion. Returning
/// without calling [`MergeResultProvider::done`] abandons the merge and the
/// journal is rolled back.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn resolve(
        &self,
        left: PageSnapshot,
        right: PageSnapshot,
        ancestor: PageSnapshot,
        provider: MergeResultProvider,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = StorageError::NotFound {
            entity: "entry",
            id: "key".into(),
        };
        assert_eq!(Status::from_storage_error(&err), Status::NotFound);

        let err = StorageError::JournalClosed;
        assert_eq!(Status::from_storage_error(&err), Status::InternalError);
    }

    #[test]
    fn test_page_change_is_empty() {
        assert!(PageChange::default().is_empty());
        let change = PageChange {
            changes: Vec::new(),
            deletions: vec![b"key".to_vec()],
        };
        assert!(!change.is_empty());
    }
}
