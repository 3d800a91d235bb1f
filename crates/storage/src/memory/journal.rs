//! Journal implementation for the in-memory backend.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::commit::Commit;
use crate::error::StorageError;
use crate::journal::Journal;
use crate::types::{ChangeSource, CommitId, KeyPriority, ObjectId};

use super::{StoreCore, Tree, TreeValue};

/// Single-owner builder of one in-memory commit.
///
/// Starts from a copy of the (first) parent's entries tree; `put`/`delete`
/// mutate the copy, `commit` seals it into the store. Dropping an open
/// journal rolls it back.
pub struct MemoryJournal {
    core: Arc<StoreCore>,
    parent_ids: Vec<CommitId>,
    tree: Tree,
    terminated: bool,
}

impl MemoryJournal {
    pub(crate) fn new(core: Arc<StoreCore>, parent_ids: Vec<CommitId>, base: Tree) -> Self {
        Self {
            core,
            parent_ids,
            tree: base,
            terminated: false,
        }
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.terminated {
            Err(StorageError::JournalClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn put(
        &mut self,
        key: &[u8],
        object_id: ObjectId,
        priority: KeyPriority,
    ) -> Result<(), StorageError> {
        self.check_open()?;
        self.tree
            .insert(key.to_vec(), TreeValue { object_id, priority });
        Ok(())
    }

    async fn delete(&mut self, key: &[u8]) -> Result<(), StorageError> {
        self.check_open()?;
        self.tree.remove(key);
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<Arc<dyn Commit>, StorageError> {
        self.check_open()?;
        self.terminated = true;
        let tree = std::mem::take(&mut self.tree);
        let root_id = self.core.insert_tree(tree);
        let timestamp = self.core.take_timestamp();
        let commit = self.core.insert_commit(
            std::mem::take(&mut self.parent_ids),
            timestamp,
            root_id,
            ChangeSource::Local,
        );
        Ok(commit)
    }

    fn rollback(mut self: Box<Self>) {
        self.terminated = true;
    }
}

impl Drop for MemoryJournal {
    fn drop(&mut self) {
        if !self.terminated {
            debug!("journal dropped while open, rolling back");
        }
    }
}
