//! Paged diff computation between an ancestor commit and one side of a
//! conflict.

use tracing::trace;

use converge_storage::{Commit, Entry, PageStorage};

use crate::errors::MergeError;
use crate::protocol::{DiffEntry, PageChange, PageToken};

/// Compute one page of the diff `base -> other`.
///
/// Entries are walked in key order; keys added or modified in `other` become
/// `changes` (with their values inlined), keys missing from `other` become
/// `deletions`. The page stops once `byte_budget` is spent, returning an
/// opaque continuation token; pass it back to resume. A `None` token in the
/// result marks the final page.
///
/// A single entry larger than the whole budget is still emitted on its own
/// page so the walk always makes progress.
pub async fn compute_page_change(
    storage: &dyn PageStorage,
    base: &dyn Commit,
    other: &dyn Commit,
    token: Option<&PageToken>,
    byte_budget: usize,
) -> Result<(PageChange, Option<PageToken>), MergeError> {
    let base_entries = storage.get_commit_entries(base).await?;
    let other_entries = storage.get_commit_entries(other).await?;
    let start_key: Option<&[u8]> = token.map(|t| t.0.as_slice());

    let mut change = PageChange::default();
    let mut spent = 0usize;

    let mut base_iter = base_entries.iter().peekable();
    let mut other_iter = other_entries.iter().peekable();

    loop {
        let item = next_diff_item(&mut base_iter, &mut other_iter);
        let Some(item) = item else {
            trace!(
                changes = change.changes.len(),
                deletions = change.deletions.len(),
                "diff complete"
            );
            return Ok((change, None));
        };

        // Skip everything before the continuation point.
        if let Some(start) = start_key {
            if item.key() < start {
                continue;
            }
        }

        // The budget bounds inline data, so changed entries are costed by
        // key plus loaded value size.
        match item {
            DiffItem::Changed(entry) => {
                let value = storage.get_object(&entry.object_id).await?;
                let cost = entry.key.len() + value.len();
                if spent + cost > byte_budget && !change.is_empty() {
                    return Ok((change, Some(PageToken(entry.key.clone()))));
                }
                spent += cost;
                change.changes.push(DiffEntry {
                    key: entry.key.clone(),
                    value,
                    priority: entry.priority,
                });
            }
            DiffItem::Deleted(key) => {
                let cost = key.len();
                if spent + cost > byte_budget && !change.is_empty() {
                    return Ok((change, Some(PageToken(key.to_vec()))));
                }
                spent += cost;
                change.deletions.push(key.to_vec());
            }
        }
    }
}

enum DiffItem<'a> {
    Changed(&'a Entry),
    Deleted(&'a [u8]),
}

impl DiffItem<'_> {
    fn key(&self) -> &[u8] {
        match self {
            DiffItem::Changed(entry) => &entry.key,
            DiffItem::Deleted(key) => key,
        }
    }
}

/// Advance the sorted two-pointer walk to the next differing key.
fn next_diff_item<'a>(
    base_iter: &mut std::iter::Peekable<std::slice::Iter<'a, Entry>>,
    other_iter: &mut std::iter::Peekable<std::slice::Iter<'a, Entry>>,
) -> Option<DiffItem<'a>> {
    loop {
        match (base_iter.peek(), other_iter.peek()) {
            (None, None) => return None,
            (Some(_), None) => {
                let base = base_iter.next()?;
                return Some(DiffItem::Deleted(&base.key));
            }
            (None, Some(_)) => {
                let other = other_iter.next()?;
                return Some(DiffItem::Changed(other));
            }
            (Some(base), Some(other)) => match base.key.cmp(&other.key) {
                std::cmp::Ordering::Less => {
                    let base = base_iter.next()?;
                    return Some(DiffItem::Deleted(&base.key));
                }
                std::cmp::Ordering::Greater => {
                    let other = other_iter.next()?;
                    return Some(DiffItem::Changed(other));
                }
                std::cmp::Ordering::Equal => {
                    let same = base.object_id == other.object_id;
                    base_iter.next();
                    let other = other_iter.next()?;
                    if !same {
                        return Some(DiffItem::Changed(other));
                    }
                    // Unchanged key; keep walking.
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_storage::{
        CommitId, Journal, JournalType, KeyPriority, MemoryPageStorage, FIRST_PAGE_COMMIT_ID,
    };
    use std::sync::Arc;

    async fn commit_with(
        storage: &MemoryPageStorage,
        parent: &CommitId,
        puts: &[(&str, &str)],
        deletes: &[&str],
    ) -> Arc<dyn Commit> {
        let mut journal = storage
            .start_commit(parent, JournalType::Implicit)
            .await
            .unwrap();
        for (key, value) in puts {
            let object_id = storage
                .add_object_from_local(value.as_bytes().to_vec())
                .await
                .unwrap();
            journal
                .put(key.as_bytes(), object_id, KeyPriority::Eager)
                .await
                .unwrap();
        }
        for key in deletes {
            journal.delete(key.as_bytes()).await.unwrap();
        }
        journal.commit().await.unwrap()
    }

    #[tokio::test]
    async fn test_diff_reports_changes_and_deletions() {
        let storage = MemoryPageStorage::new();
        let base = commit_with(
            &storage,
            &FIRST_PAGE_COMMIT_ID,
            &[("a", "1"), ("b", "2"), ("c", "3")],
            &[],
        )
        .await;
        let other = commit_with(
            &storage,
            &base.id(),
            &[("b", "changed"), ("d", "new")],
            &["c"],
        )
        .await;

        let (change, token) = compute_page_change(&storage, &*base, &*other, None, 1 << 20)
            .await
            .unwrap();
        assert!(token.is_none());
        assert_eq!(change.deletions, vec![b"c".to_vec()]);
        let keys: Vec<_> = change.changes.iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"d".to_vec()]);
        assert_eq!(change.changes[0].value, b"changed");
        assert_eq!(change.changes[1].value, b"new");
    }

    #[tokio::test]
    async fn test_diff_of_identical_commits_is_empty() {
        let storage = MemoryPageStorage::new();
        let commit = commit_with(&storage, &FIRST_PAGE_COMMIT_ID, &[("a", "1")], &[]).await;

        let (change, token) = compute_page_change(&storage, &*commit, &*commit, None, 1 << 20)
            .await
            .unwrap();
        assert!(change.is_empty());
        assert!(token.is_none());
    }

    #[tokio::test]
    async fn test_diff_pagination_walks_all_items() {
        let storage = MemoryPageStorage::new();
        let base = commit_with(
            &storage,
            &FIRST_PAGE_COMMIT_ID,
            &[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")],
            &[],
        )
        .await;
        let other = commit_with(
            &storage,
            &base.id(),
            &[("a", "x"), ("c", "y"), ("e", "z")],
            &["b", "d"],
        )
        .await;

        // A one-byte budget forces one item per page.
        let mut token = None;
        let mut changes = Vec::new();
        let mut deletions = Vec::new();
        let mut pages = 0;
        loop {
            let (change, next) =
                compute_page_change(&storage, &*base, &*other, token.as_ref(), 1)
                    .await
                    .unwrap();
            changes.extend(change.changes);
            deletions.extend(change.deletions);
            pages += 1;
            assert!(pages < 16, "pagination must terminate");
            match next {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        assert!(pages > 1, "budget must split the diff across pages");
        let change_keys: Vec<_> = changes.iter().map(|e| e.key.clone()).collect();
        assert_eq!(
            change_keys,
            vec![b"a".to_vec(), b"c".to_vec(), b"e".to_vec()]
        );
        assert_eq!(deletions, vec![b"b".to_vec(), b"d".to_vec()]);
    }
}
