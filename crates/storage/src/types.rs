//! Identifier and entry types shared by every storage backend.

use serde::{Deserialize, Serialize};

/// Width of a commit id in bytes. Commit ids are content-addressed digests.
pub const COMMIT_ID_SIZE: usize = 32;

/// Reserved id of the root commit every page history starts from.
///
/// The root commit exists in every backend, has no parents and an empty
/// entries tree, and is an ancestor of every other commit on the page.
pub const FIRST_PAGE_COMMIT_ID: CommitId = CommitId([0u8; COMMIT_ID_SIZE]);

/// Opaque, fixed-width, content-addressed commit identifier.
///
/// Ordering is lexicographic over the raw bytes; this is the tie-break order
/// used wherever commits with equal timestamps must be ranked.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitId(pub [u8; COMMIT_ID_SIZE]);

impl CommitId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Eight hex chars are enough to tell commits apart in logs.
        write!(f, "CommitId({})", &hex::encode(self.0)[..8])
    }
}

/// Opaque identifier of a stored object (a value blob or an entries tree).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub Vec<u8>);

impl ObjectId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl std::fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hex = hex::encode(&self.0);
        write!(f, "ObjectId({})", &hex[..hex.len().min(8)])
    }
}

/// Download/retention priority of a key's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPriority {
    /// The value is fetched together with the commit.
    Eager,
    /// The value is fetched on first access.
    Lazy,
}

/// One key/value binding inside a commit's entries tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Vec<u8>,
    pub object_id: ObjectId,
    pub priority: KeyPriority,
}

/// Where a batch of new commits came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    /// Committed through a local journal.
    Local,
    /// Arrived through cloud synchronization.
    Sync,
}

/// Kind of journal requested from [`PageStorage::start_commit`].
///
/// [`PageStorage::start_commit`]: crate::store::PageStorage::start_commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalType {
    /// Backend-initiated bookkeeping commit.
    Implicit,
    /// Application-initiated transaction.
    Explicit,
}
