//! Content-addressed in-memory page store.
//!
//! [`MemoryPageStorage`] implements the full [`PageStorage`] contract without
//! touching disk: commits, entries trees, and value objects live in hash
//! maps keyed by their sha-256 digests. It backs the merging test suites and
//! is suitable for embedders that only need a scratch page.
//!
//! Timestamps come from an internal counter so tests can script them via
//! [`MemoryPageStorage::set_next_timestamp`]. Commits arriving from another
//! device are injected through [`MemoryPageStorage::apply_remote_commit`],
//! which notifies watchers with [`ChangeSource::Sync`].

pub mod commit;
pub mod journal;

pub use commit::MemoryCommit;
pub use journal::MemoryJournal;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::commit::Commit;
use crate::error::StorageError;
use crate::journal::Journal;
use crate::store::{CommitWatcher, PageStorage, WatcherToken};
use crate::types::{
    ChangeSource, CommitId, Entry, JournalType, KeyPriority, ObjectId, FIRST_PAGE_COMMIT_ID,
};

/// One value binding inside an entries tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TreeValue {
    pub object_id: ObjectId,
    pub priority: KeyPriority,
}

/// An entries tree: sorted key → value binding map.
pub(crate) type Tree = BTreeMap<Vec<u8>, TreeValue>;

// ---------------------------------------------------------------------------
// Content addressing
// ---------------------------------------------------------------------------

pub(crate) fn object_id_for(data: &[u8]) -> ObjectId {
    ObjectId(Sha256::digest(data).to_vec())
}

pub(crate) fn tree_id_for(tree: &Tree) -> ObjectId {
    let mut hasher = Sha256::new();
    for (key, value) in tree {
        hasher.update((key.len() as u64).to_be_bytes());
        hasher.update(key);
        hasher.update(value.object_id.as_bytes());
        hasher.update([match value.priority {
            KeyPriority::Eager => 0u8,
            KeyPriority::Lazy => 1u8,
        }]);
    }
    ObjectId(hasher.finalize().to_vec())
}

pub(crate) fn commit_storage_bytes(
    parent_ids: &[CommitId],
    timestamp: i64,
    root_id: &ObjectId,
) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(parent_ids.len() as u8).to_be_bytes());
    for parent in parent_ids {
        bytes.extend_from_slice(parent.as_bytes());
    }
    bytes.extend_from_slice(&timestamp.to_be_bytes());
    bytes.extend_from_slice(root_id.as_bytes());
    bytes
}

pub(crate) fn commit_id_for(
    parent_ids: &[CommitId],
    timestamp: i64,
    root_id: &ObjectId,
) -> CommitId {
    let digest = Sha256::digest(commit_storage_bytes(parent_ids, timestamp, root_id));
    let mut id = [0u8; crate::types::COMMIT_ID_SIZE];
    id.copy_from_slice(&digest);
    CommitId(id)
}

// ---------------------------------------------------------------------------
// Shared store state
// ---------------------------------------------------------------------------

pub(crate) struct StoreCore {
    state: Mutex<StoreState>,
    watchers: Mutex<Vec<(u64, Weak<dyn CommitWatcher>)>>,
    watcher_seq: AtomicU64,
    next_timestamp: AtomicI64,
}

struct StoreState {
    commits: HashMap<CommitId, Arc<MemoryCommit>>,
    trees: HashMap<ObjectId, Tree>,
    objects: HashMap<ObjectId, Vec<u8>>,
    heads: BTreeSet<CommitId>,
}

impl StoreCore {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn take_timestamp(&self) -> i64 {
        self.next_timestamp.fetch_add(1, Ordering::SeqCst)
    }

    /// Insert a commit with the given shape, updating the head set. Returns
    /// the stored commit; if an identical commit already exists (same
    /// content-addressed id), the existing one is returned and watchers are
    /// not re-notified.
    pub(crate) fn insert_commit(
        &self,
        parent_ids: Vec<CommitId>,
        timestamp: i64,
        root_id: ObjectId,
        source: ChangeSource,
    ) -> Arc<MemoryCommit> {
        let id = commit_id_for(&parent_ids, timestamp, &root_id);
        let commit = {
            let mut state = self.lock_state();
            if let Some(existing) = state.commits.get(&id) {
                return existing.clone();
            }
            let commit = Arc::new(MemoryCommit::new(id, parent_ids.clone(), timestamp, root_id));
            state.commits.insert(id, commit.clone());
            for parent in &parent_ids {
                state.heads.remove(parent);
            }
            state.heads.insert(id);
            commit
        };
        self.notify(&[commit.clone() as Arc<dyn Commit>], source);
        commit
    }

    pub(crate) fn insert_tree(&self, tree: Tree) -> ObjectId {
        let id = tree_id_for(&tree);
        self.lock_state().trees.entry(id.clone()).or_insert(tree);
        id
    }

    fn notify(&self, commits: &[Arc<dyn Commit>], source: ChangeSource) {
        let live: Vec<Arc<dyn CommitWatcher>> = {
            let mut watchers = self
                .watchers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            watchers.retain(|(_, w)| w.strong_count() > 0);
            watchers.iter().filter_map(|(_, w)| w.upgrade()).collect()
        };
        for watcher in live {
            watcher.on_new_commits(commits, source);
        }
    }
}

// ---------------------------------------------------------------------------
// Storage handle
// ---------------------------------------------------------------------------

/// In-memory [`PageStorage`] backend.
///
/// Cheap to construct; all state is internal and the handle is `Send + Sync`
/// so it can live inside an `Arc` shared with the merging core.
pub struct MemoryPageStorage {
    core: Arc<StoreCore>,
}

impl MemoryPageStorage {
    pub fn new() -> Self {
        let empty_tree: Tree = BTreeMap::new();
        let empty_tree_id = tree_id_for(&empty_tree);

        let root = Arc::new(MemoryCommit::new(
            FIRST_PAGE_COMMIT_ID,
            Vec::new(),
            0,
            empty_tree_id.clone(),
        ));

        let mut commits = HashMap::new();
        commits.insert(FIRST_PAGE_COMMIT_ID, root);
        let mut trees = HashMap::new();
        trees.insert(empty_tree_id, empty_tree);
        let mut heads = BTreeSet::new();
        heads.insert(FIRST_PAGE_COMMIT_ID);

        Self {
            core: Arc::new(StoreCore {
                state: Mutex::new(StoreState {
                    commits,
                    trees,
                    objects: HashMap::new(),
                    heads,
                }),
                watchers: Mutex::new(Vec::new()),
                watcher_seq: AtomicU64::new(0),
                next_timestamp: AtomicI64::new(1),
            }),
        }
    }

    /// Override the timestamp the next committed journal will receive.
    /// Subsequent commits continue counting up from there.
    pub fn set_next_timestamp(&self, timestamp: i64) {
        self.core.next_timestamp.store(timestamp, Ordering::SeqCst);
    }

    /// Inject a commit that arrived from another device via cloud sync.
    ///
    /// `entries` is the commit's complete entries list (not a delta).
    /// Watchers are notified with [`ChangeSource::Sync`].
    pub fn apply_remote_commit(
        &self,
        parent_ids: Vec<CommitId>,
        timestamp: i64,
        entries: Vec<(Vec<u8>, Vec<u8>, KeyPriority)>,
    ) -> Result<Arc<dyn Commit>, StorageError> {
        let mut tree: Tree = BTreeMap::new();
        {
            let mut state = self.core.lock_state();
            for parent in &parent_ids {
                if !state.commits.contains_key(parent) {
                    return Err(StorageError::commit_not_found(parent));
                }
            }
            for (key, value, priority) in entries {
                let object_id = object_id_for(&value);
                state.objects.entry(object_id.clone()).or_insert(value);
                tree.insert(key, TreeValue { object_id, priority });
            }
        }
        let root_id = self.core.insert_tree(tree);
        Ok(self
            .core
            .insert_commit(parent_ids, timestamp, root_id, ChangeSource::Sync))
    }

    fn tree_for(&self, commit: &dyn Commit) -> Result<Tree, StorageError> {
        let state = self.core.lock_state();
        state
            .trees
            .get(&commit.root_id())
            .cloned()
            .ok_or_else(|| StorageError::object_not_found(commit.root_id()))
    }
}

impl Default for MemoryPageStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageStorage for MemoryPageStorage {
    fn head_commit_ids(&self) -> Vec<CommitId> {
        self.core.lock_state().heads.iter().copied().collect()
    }

    async fn get_commit(&self, id: &CommitId) -> Result<Arc<dyn Commit>, StorageError> {
        let state = self.core.lock_state();
        state
            .commits
            .get(id)
            .map(|c| c.clone() as Arc<dyn Commit>)
            .ok_or_else(|| StorageError::commit_not_found(id))
    }

    async fn get_commit_entries(&self, commit: &dyn Commit) -> Result<Vec<Entry>, StorageError> {
        let tree = self.tree_for(commit)?;
        Ok(tree
            .into_iter()
            .map(|(key, value)| Entry {
                key,
                object_id: value.object_id,
                priority: value.priority,
            })
            .collect())
    }

    async fn get_entry_from_commit(
        &self,
        commit: &dyn Commit,
        key: &[u8],
    ) -> Result<Entry, StorageError> {
        let tree = self.tree_for(commit)?;
        tree.get(key)
            .map(|value| Entry {
                key: key.to_vec(),
                object_id: value.object_id.clone(),
                priority: value.priority,
            })
            .ok_or_else(|| StorageError::entry_not_found(key))
    }

    async fn get_object(&self, id: &ObjectId) -> Result<Vec<u8>, StorageError> {
        let state = self.core.lock_state();
        state
            .objects
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::object_not_found(id))
    }

    async fn add_object_from_local(&self, data: Vec<u8>) -> Result<ObjectId, StorageError> {
        let id = object_id_for(&data);
        self.core
            .lock_state()
            .objects
            .entry(id.clone())
            .or_insert(data);
        Ok(id)
    }

    async fn start_commit(
        &self,
        parent_id: &CommitId,
        journal_type: JournalType,
    ) -> Result<Box<dyn Journal>, StorageError> {
        debug!(parent = %parent_id, ?journal_type, "starting commit journal");
        let parent = {
            let state = self.core.lock_state();
            state
                .commits
                .get(parent_id)
                .cloned()
                .ok_or_else(|| StorageError::commit_not_found(parent_id))?
        };
        let base = self.tree_for(&*parent)?;
        Ok(Box::new(MemoryJournal::new(
            self.core.clone(),
            vec![*parent_id],
            base,
        )))
    }

    async fn start_merge_commit(
        &self,
        left: &CommitId,
        right: &CommitId,
    ) -> Result<Box<dyn Journal>, StorageError> {
        debug!(left = %left, right = %right, "starting merge journal");
        let left_commit = {
            let state = self.core.lock_state();
            if !state.commits.contains_key(right) {
                return Err(StorageError::commit_not_found(right));
            }
            state
                .commits
                .get(left)
                .cloned()
                .ok_or_else(|| StorageError::commit_not_found(left))?
        };
        // The merge journal starts from left's content; untouched keys keep
        // left's values.
        let base = self.tree_for(&*left_commit)?;
        Ok(Box::new(MemoryJournal::new(
            self.core.clone(),
            vec![*left, *right],
            base,
        )))
    }

    async fn merge_identical_commits(
        &self,
        left: Arc<dyn Commit>,
        right: Arc<dyn Commit>,
    ) -> Result<Arc<dyn Commit>, StorageError> {
        if left.root_id() != right.root_id() {
            return Err(StorageError::Corrupt(format!(
                "commits {} and {} do not share a root",
                left.id(),
                right.id()
            )));
        }
        // Sorted parents and the min timestamp make the merge commit
        // identical no matter which device produces it.
        let mut parent_ids = vec![left.id(), right.id()];
        parent_ids.sort();
        let timestamp = left.timestamp().min(right.timestamp());
        Ok(self.core.insert_commit(
            parent_ids,
            timestamp,
            left.root_id(),
            ChangeSource::Local,
        ))
    }

    fn add_commit_watcher(&self, watcher: Weak<dyn CommitWatcher>) -> WatcherToken {
        let token = self.core.watcher_seq.fetch_add(1, Ordering::SeqCst);
        self.core
            .watchers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((token, watcher));
        WatcherToken(token)
    }

    fn remove_commit_watcher(&self, token: WatcherToken) {
        self.core
            .watchers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .retain(|(t, _)| *t != token.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn commit_value(
        storage: &MemoryPageStorage,
        parent: &CommitId,
        key: &[u8],
        value: &[u8],
    ) -> Arc<dyn Commit> {
        let object_id = storage.add_object_from_local(value.to_vec()).await.unwrap();
        let mut journal = storage
            .start_commit(parent, JournalType::Implicit)
            .await
            .unwrap();
        journal
            .put(key, object_id, KeyPriority::Eager)
            .await
            .unwrap();
        journal.commit().await.unwrap()
    }

    #[tokio::test]
    async fn test_root_commit_exists() {
        let storage = MemoryPageStorage::new();
        let root = storage.get_commit(&FIRST_PAGE_COMMIT_ID).await.unwrap();
        assert_eq!(root.id(), FIRST_PAGE_COMMIT_ID);
        assert!(root.parent_ids().is_empty());
        assert_eq!(storage.head_commit_ids(), vec![FIRST_PAGE_COMMIT_ID]);
    }

    #[tokio::test]
    async fn test_commit_updates_heads() {
        let storage = MemoryPageStorage::new();
        let commit = commit_value(&storage, &FIRST_PAGE_COMMIT_ID, b"key", b"a").await;
        assert_eq!(storage.head_commit_ids(), vec![commit.id()]);

        // A second child of root forks the page.
        let other = commit_value(&storage, &FIRST_PAGE_COMMIT_ID, b"key", b"b").await;
        let heads = storage.head_commit_ids();
        assert_eq!(heads.len(), 2);
        assert!(heads.contains(&commit.id()));
        assert!(heads.contains(&other.id()));
    }

    #[tokio::test]
    async fn test_rollback_leaves_no_trace() {
        let storage = MemoryPageStorage::new();
        let object_id = storage.add_object_from_local(b"v".to_vec()).await.unwrap();
        let mut journal = storage
            .start_commit(&FIRST_PAGE_COMMIT_ID, JournalType::Explicit)
            .await
            .unwrap();
        journal
            .put(b"key", object_id, KeyPriority::Eager)
            .await
            .unwrap();
        journal.rollback();
        assert_eq!(storage.head_commit_ids(), vec![FIRST_PAGE_COMMIT_ID]);
    }

    #[tokio::test]
    async fn test_dropped_journal_rolls_back() {
        let storage = MemoryPageStorage::new();
        {
            let _journal = storage
                .start_commit(&FIRST_PAGE_COMMIT_ID, JournalType::Explicit)
                .await
                .unwrap();
        }
        assert_eq!(storage.head_commit_ids(), vec![FIRST_PAGE_COMMIT_ID]);
    }

    #[tokio::test]
    async fn test_delete_of_missing_key_is_noop() {
        let storage = MemoryPageStorage::new();
        let mut journal = storage
            .start_commit(&FIRST_PAGE_COMMIT_ID, JournalType::Explicit)
            .await
            .unwrap();
        journal.delete(b"missing").await.unwrap();
        let commit = journal.commit().await.unwrap();
        assert_ne!(commit.id(), FIRST_PAGE_COMMIT_ID);
        assert!(storage.get_commit_entries(&*commit).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_identical_commits_takes_min_timestamp() {
        let storage = MemoryPageStorage::new();
        storage.set_next_timestamp(10);
        let a = commit_value(&storage, &FIRST_PAGE_COMMIT_ID, b"key", b"same").await;
        storage.set_next_timestamp(20);
        let b = commit_value(&storage, &FIRST_PAGE_COMMIT_ID, b"key", b"same").await;
        assert_eq!(a.root_id(), b.root_id());
        assert_ne!(a.id(), b.id());

        let merge = storage.merge_identical_commits(a.clone(), b).await.unwrap();
        assert_eq!(merge.timestamp(), 10);
        assert_eq!(merge.root_id(), a.root_id());
        assert_eq!(merge.parent_ids().len(), 2);
        assert_eq!(storage.head_commit_ids(), vec![merge.id()]);
    }

    #[tokio::test]
    async fn test_apply_remote_commit_notifies_sync_watchers() {
        use std::sync::Mutex;

        struct Recorder(Mutex<Vec<ChangeSource>>);
        impl CommitWatcher for Recorder {
            fn on_new_commits(&self, _commits: &[Arc<dyn Commit>], source: ChangeSource) {
                self.0.lock().unwrap().push(source);
            }
        }

        let storage = MemoryPageStorage::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let watcher: Arc<dyn CommitWatcher> = recorder.clone();
        let weak: Weak<dyn CommitWatcher> = Arc::downgrade(&watcher);
        let token = storage.add_commit_watcher(weak);

        commit_value(&storage, &FIRST_PAGE_COMMIT_ID, b"key", b"a").await;
        storage
            .apply_remote_commit(
                vec![FIRST_PAGE_COMMIT_ID],
                99,
                vec![(b"key".to_vec(), b"b".to_vec(), KeyPriority::Eager)],
            )
            .unwrap();

        let sources = recorder.0.lock().unwrap().clone();
        assert_eq!(sources, vec![ChangeSource::Local, ChangeSource::Sync]);

        storage.remove_commit_watcher(token);
        commit_value(&storage, &FIRST_PAGE_COMMIT_ID, b"key", b"c").await;
        assert_eq!(recorder.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_entry_lookup_not_found_is_surfaced() {
        let storage = MemoryPageStorage::new();
        let commit = commit_value(&storage, &FIRST_PAGE_COMMIT_ID, b"key", b"a").await;
        let err = storage
            .get_entry_from_commit(&*commit, b"other")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
