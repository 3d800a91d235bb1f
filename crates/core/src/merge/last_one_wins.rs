//! Built-in automatic strategy: the most recent head wins each conflict.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use converge_storage::{Commit, Entry, PageStorage};

use crate::errors::MergeError;
use crate::merge::strategy::{MergeOutcome, MergeStrategy};
use crate::page::PageManager;

/// Automatic strategy resolving every per-key conflict in favor of the head
/// with the greater timestamp (ties broken by head id).
///
/// The merge journal starts from `left`'s content; only keys where `right`
/// wins need explicit writes. Fully in-process, no external input.
pub struct LastOneWinsStrategy {
    cancelled: AtomicBool,
}

impl LastOneWinsStrategy {
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for LastOneWinsStrategy {
    fn default() -> Self {
        Self::new()
    }
}

fn entry_map(entries: Vec<Entry>) -> BTreeMap<Vec<u8>, Entry> {
    entries.into_iter().map(|e| (e.key.clone(), e)).collect()
}

fn same_value(a: Option<&Entry>, b: Option<&Entry>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.object_id == b.object_id,
        _ => false,
    }
}

#[async_trait]
impl MergeStrategy for LastOneWinsStrategy {
    async fn merge(
        &self,
        storage: Arc<dyn PageStorage>,
        _page_manager: Arc<PageManager>,
        left: Arc<dyn Commit>,
        right: Arc<dyn Commit>,
        ancestor: Arc<dyn Commit>,
    ) -> Result<MergeOutcome, MergeError> {
        if self.is_cancelled() {
            return Ok(MergeOutcome::Cancelled);
        }

        let left_entries = entry_map(storage.get_commit_entries(&*left).await?);
        let right_entries = entry_map(storage.get_commit_entries(&*right).await?);
        let ancestor_entries = entry_map(storage.get_commit_entries(&*ancestor).await?);

        let mut journal = storage.start_merge_commit(&left.id(), &right.id()).await?;

        let right_wins_conflicts =
            (right.timestamp(), right.id()) > (left.timestamp(), left.id());

        // Decide every key where right diverged from the ancestor; keys only
        // left touched already carry left's values through the journal base.
        let candidate_keys: BTreeSet<&Vec<u8>> = ancestor_entries
            .keys()
            .chain(right_entries.keys())
            .collect();
        for key in candidate_keys {
            if self.is_cancelled() {
                journal.rollback();
                return Ok(MergeOutcome::Cancelled);
            }

            let ancestor_value = ancestor_entries.get(key);
            let right_value = right_entries.get(key);
            if same_value(right_value, ancestor_value) {
                continue;
            }

            let left_value = left_entries.get(key);
            let left_changed = !same_value(left_value, ancestor_value);
            if left_changed {
                if same_value(left_value, right_value) {
                    // Both sides made the same change.
                    continue;
                }
                if !right_wins_conflicts {
                    continue;
                }
            }

            match right_value {
                Some(entry) => {
                    journal
                        .put(key, entry.object_id.clone(), entry.priority)
                        .await?;
                }
                None => journal.delete(key).await?,
            }
        }

        if self.is_cancelled() {
            journal.rollback();
            return Ok(MergeOutcome::Cancelled);
        }

        let commit = journal.commit().await?;
        debug!(commit = %commit.id(), "last-one-wins merge committed");
        Ok(MergeOutcome::Merged(commit))
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}
