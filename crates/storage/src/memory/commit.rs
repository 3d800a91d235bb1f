//! Commit record for the in-memory backend.

use crate::commit::Commit;
use crate::types::{CommitId, ObjectId};

use super::commit_storage_bytes;

/// An immutable in-memory commit.
#[derive(Debug)]
pub struct MemoryCommit {
    id: CommitId,
    parent_ids: Vec<CommitId>,
    timestamp: i64,
    root_id: ObjectId,
}

impl MemoryCommit {
    pub(crate) fn new(
        id: CommitId,
        parent_ids: Vec<CommitId>,
        timestamp: i64,
        root_id: ObjectId,
    ) -> Self {
        Self {
            id,
            parent_ids,
            timestamp,
            root_id,
        }
    }
}

impl Commit for MemoryCommit {
    fn id(&self) -> CommitId {
        self.id
    }

    fn parent_ids(&self) -> Vec<CommitId> {
        self.parent_ids.clone()
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn root_id(&self) -> ObjectId {
        self.root_id.clone()
    }

    fn storage_bytes(&self) -> Vec<u8> {
        commit_storage_bytes(&self.parent_ids, self.timestamp, &self.root_id)
    }
}
