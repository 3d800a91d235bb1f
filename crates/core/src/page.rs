//! Page-level read surface: snapshot binding for external resolvers.

use std::sync::Arc;

use converge_storage::{Commit, CommitId, Entry, PageStorage, StorageError};

/// Binds read-only snapshots of a page at specific commits.
///
/// The merge resolver requires a page manager to be installed before it will
/// run any merge; external resolvers receive their left/right/ancestor views
/// through snapshots bound here.
pub struct PageManager {
    storage: Arc<dyn PageStorage>,
}

impl PageManager {
    pub fn new(storage: Arc<dyn PageStorage>) -> Self {
        Self { storage }
    }

    /// Bind a read-only snapshot of the page as of `commit`, restricted to
    /// keys starting with `key_prefix` (empty prefix = whole page).
    pub fn bind_page_snapshot(
        &self,
        commit: Arc<dyn Commit>,
        key_prefix: Vec<u8>,
    ) -> PageSnapshot {
        PageSnapshot {
            storage: self.storage.clone(),
            commit,
            key_prefix,
        }
    }
}

/// Read-only view of a page at one commit.
///
/// Snapshots are independently owned: a resolver may keep one alive after
/// the merge that produced it has finished.
pub struct PageSnapshot {
    storage: Arc<dyn PageStorage>,
    commit: Arc<dyn Commit>,
    key_prefix: Vec<u8>,
}

impl PageSnapshot {
    pub fn commit_id(&self) -> CommitId {
        self.commit.id()
    }

    pub fn timestamp(&self) -> i64 {
        self.commit.timestamp()
    }

    /// Value bound to `key`, loaded from object storage.
    pub async fn get(&self, key: &[u8]) -> Result<Vec<u8>, StorageError> {
        let entry = self
            .storage
            .get_entry_from_commit(&*self.commit, key)
            .await?;
        self.storage.get_object(&entry.object_id).await
    }

    /// All entries visible through this snapshot, sorted by key.
    pub async fn get_entries(&self) -> Result<Vec<Entry>, StorageError> {
        let entries = self.storage.get_commit_entries(&*self.commit).await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.key.starts_with(&self.key_prefix))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_storage::{
        Journal, JournalType, KeyPriority, MemoryPageStorage, FIRST_PAGE_COMMIT_ID,
    };

    async fn storage_with_keys(keys: &[(&str, &str)]) -> (Arc<MemoryPageStorage>, Arc<dyn Commit>) {
        let storage = Arc::new(MemoryPageStorage::new());
        let mut journal = storage
            .start_commit(&FIRST_PAGE_COMMIT_ID, JournalType::Implicit)
            .await
            .unwrap();
        for (key, value) in keys {
            let object_id = storage
                .add_object_from_local(value.as_bytes().to_vec())
                .await
                .unwrap();
            journal
                .put(key.as_bytes(), object_id, KeyPriority::Eager)
                .await
                .unwrap();
        }
        let commit = journal.commit().await.unwrap();
        (storage, commit)
    }

    #[tokio::test]
    async fn test_snapshot_reads_committed_values() {
        let (storage, commit) = storage_with_keys(&[("name", "converge")]).await;
        let manager = PageManager::new(storage);
        let snapshot = manager.bind_page_snapshot(commit, Vec::new());
        assert_eq!(snapshot.get(b"name").await.unwrap(), b"converge");
        assert!(snapshot.get(b"missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_snapshot_prefix_filter() {
        let (storage, commit) = storage_with_keys(&[
            ("user/alice", "1"),
            ("user/bob", "2"),
            ("group/dev", "3"),
        ])
        .await;
        let manager = PageManager::new(storage);
        let snapshot = manager.bind_page_snapshot(commit, b"user/".to_vec());
        let entries = snapshot.get_entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.key.starts_with(b"user/")));
    }
}
