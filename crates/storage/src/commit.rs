//! Read-only view of a single commit in a page's history DAG.

use crate::types::{CommitId, ObjectId};

/// An immutable commit record.
///
/// Commits are content-addressed: equality is id-equality, and the id covers
/// parents, timestamp, and the entries-tree root. The root commit has zero
/// parents, normal commits one, merge commits exactly two distinct parents.
///
/// Timestamps are assigned at creation time on the committing device and are
/// *not* assumed monotonic across the DAG.
pub trait Commit: Send + Sync {
    fn id(&self) -> CommitId;

    /// Parent commit ids, 0 to 2 of them.
    fn parent_ids(&self) -> Vec<CommitId>;

    /// Creation timestamp, device-local.
    fn timestamp(&self) -> i64;

    /// Identifier of the entries tree this commit points at.
    fn root_id(&self) -> ObjectId;

    /// Serialized form, as persisted or shipped to the cloud.
    fn storage_bytes(&self) -> Vec<u8>;
}
