//! The page storage collaborator consumed by the conflict-resolution core.

use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::commit::Commit;
use crate::error::StorageError;
use crate::journal::Journal;
use crate::types::{ChangeSource, CommitId, Entry, JournalType, ObjectId};

/// Observer of new commits landing in a page store, whether committed
/// locally or applied from cloud sync.
pub trait CommitWatcher: Send + Sync {
    fn on_new_commits(&self, commits: &[Arc<dyn Commit>], source: ChangeSource);
}

/// Handle returned by [`PageStorage::add_commit_watcher`], used to
/// unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherToken(pub u64);

/// Storage for a single page: its commit DAG, entries trees, and objects.
///
/// All lookups are suspension points; implementations may hop to an I/O
/// executor internally but resolve their futures on the caller's runtime.
#[async_trait]
pub trait PageStorage: Send + Sync {
    /// Ids of commits that are not parents of any other known commit,
    /// sorted ascending. Always non-empty; more than one id means the page
    /// has unresolved conflicts.
    fn head_commit_ids(&self) -> Vec<CommitId>;

    async fn get_commit(&self, id: &CommitId) -> Result<Arc<dyn Commit>, StorageError>;

    /// All entries of `commit`, sorted by key.
    async fn get_commit_entries(&self, commit: &dyn Commit) -> Result<Vec<Entry>, StorageError>;

    /// Entry for `key` in `commit`. `NotFound` is an expected outcome and is
    /// surfaced to the caller.
    async fn get_entry_from_commit(
        &self,
        commit: &dyn Commit,
        key: &[u8],
    ) -> Result<Entry, StorageError>;

    /// Content of a stored object.
    async fn get_object(&self, id: &ObjectId) -> Result<Vec<u8>, StorageError>;

    /// Store a locally produced value and return its id.
    async fn add_object_from_local(&self, data: Vec<u8>) -> Result<ObjectId, StorageError>;

    /// Open a journal for a normal (single-parent) commit.
    async fn start_commit(
        &self,
        parent_id: &CommitId,
        journal_type: JournalType,
    ) -> Result<Box<dyn Journal>, StorageError>;

    /// Open a journal for a merge commit. The journal starts from the
    /// content of `left`; untouched keys keep left's values.
    async fn start_merge_commit(
        &self,
        left: &CommitId,
        right: &CommitId,
    ) -> Result<Box<dyn Journal>, StorageError>;

    /// Merge two heads that already point at the same entries tree.
    ///
    /// The resulting merge commit reuses that tree and carries the *smaller*
    /// of the two timestamps, so that devices racing to close the same
    /// benign fork converge on an identical commit.
    async fn merge_identical_commits(
        &self,
        left: Arc<dyn Commit>,
        right: Arc<dyn Commit>,
    ) -> Result<Arc<dyn Commit>, StorageError>;

    /// Register a commit watcher. The store holds only a weak reference;
    /// dead watchers are pruned on notification.
    fn add_commit_watcher(&self, watcher: Weak<dyn CommitWatcher>) -> WatcherToken;

    fn remove_commit_watcher(&self, token: WatcherToken);
}
