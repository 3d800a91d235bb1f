//! Mutable builder of a new commit.

use std::sync::Arc;

use async_trait::async_trait;

use crate::commit::Commit;
use crate::error::StorageError;
use crate::types::{KeyPriority, ObjectId};

/// A scoped, single-owner builder of one new commit.
///
/// A journal starts from the content of its (first) parent, accepts `put` and
/// `delete` mutations, and terminates in exactly one of [`commit`] or
/// [`rollback`] — both consume the journal, so the type system rules out
/// double-termination. Implementations must roll back when a journal is
/// dropped without being terminated.
///
/// Journals are not thread-safe; the single owner drives all operations.
///
/// [`commit`]: Journal::commit
/// [`rollback`]: Journal::rollback
#[async_trait]
pub trait Journal: Send {
    /// Bind `key` to an existing object.
    async fn put(
        &mut self,
        key: &[u8],
        object_id: ObjectId,
        priority: KeyPriority,
    ) -> Result<(), StorageError>;

    /// Remove `key` from the commit under construction. Deleting a key that
    /// is not present is a no-op.
    async fn delete(&mut self, key: &[u8]) -> Result<(), StorageError>;

    /// Seal the journal into a new commit. The new commit becomes a head and
    /// commit watchers are notified.
    async fn commit(self: Box<Self>) -> Result<Arc<dyn Commit>, StorageError>;

    /// Discard all staged mutations.
    fn rollback(self: Box<Self>);
}
