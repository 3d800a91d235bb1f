//! Lowest-common-ancestor search over the commit DAG.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use tracing::trace;

use converge_storage::{Commit, CommitId, PageStorage};

use crate::errors::MergeError;

/// Heap key: newest timestamp first, ties broken by lexicographic id so the
/// expansion order is deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct FrontierKey {
    timestamp: i64,
    id: CommitId,
}

/// Which of the two input subtrees reached a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Sides {
    left: bool,
    right: bool,
}

impl Sides {
    fn union(&mut self, other: Sides) {
        self.left |= other.left;
        self.right |= other.right;
    }

    fn both(self) -> bool {
        self.left && self.right
    }
}

struct Node {
    sides: Sides,
    commit: Arc<dyn Commit>,
    expanded: bool,
}

/// Find the lowest common ancestor of `left` and `right`.
///
/// Bidirectional expansion over a single priority frontier: each step pops
/// the newest unexpanded commit from either side and pushes its parents,
/// accumulating per-commit side tags. The first commit popped with both
/// tags is the common ancestor with the greatest timestamp; since every pop
/// is the newest remaining candidate, no younger common ancestor can exist.
///
/// Terminates after touching at most the union of both ancestor sets: the
/// root is reachable from every commit and accumulates both tags.
/// Storage lookup errors abort the search and are propagated.
pub async fn find_common_ancestor(
    storage: &dyn PageStorage,
    left: Arc<dyn Commit>,
    right: Arc<dyn Commit>,
) -> Result<Arc<dyn Commit>, MergeError> {
    let mut frontier = BinaryHeap::new();
    let mut seen: HashMap<CommitId, Node> = HashMap::new();

    let sides = [
        Sides {
            left: true,
            right: false,
        },
        Sides {
            left: false,
            right: true,
        },
    ];
    for (commit, sides) in [left, right].into_iter().zip(sides) {
        match seen.entry(commit.id()) {
            MapEntry::Occupied(mut occupied) => {
                // Both inputs are the same commit; it is its own ancestor.
                occupied.get_mut().sides.union(sides);
            }
            MapEntry::Vacant(vacant) => {
                frontier.push(FrontierKey {
                    timestamp: commit.timestamp(),
                    id: commit.id(),
                });
                vacant.insert(Node {
                    sides,
                    commit,
                    expanded: false,
                });
            }
        }
    }

    while let Some(key) = frontier.pop() {
        let (sides, commit) = {
            let node = seen
                .get_mut(&key.id)
                .ok_or_else(|| MergeError::Internal("frontier entry missing".into()))?;
            if node.sides.both() {
                trace!(ancestor = %key.id, "expansion fronts met");
                return Ok(node.commit.clone());
            }
            node.expanded = true;
            (node.sides, node.commit.clone())
        };

        for parent_id in commit.parent_ids() {
            match seen.entry(parent_id) {
                MapEntry::Occupied(mut occupied) => {
                    let node = occupied.get_mut();
                    let was_both = node.sides.both();
                    node.sides.union(sides);
                    // Timestamps are not assumed monotonic, so one front can
                    // reach a commit the other side already expanded.
                    if node.expanded && node.sides.both() && !was_both {
                        return Ok(node.commit.clone());
                    }
                }
                MapEntry::Vacant(vacant) => {
                    let parent = storage.get_commit(&parent_id).await?;
                    frontier.push(FrontierKey {
                        timestamp: parent.timestamp(),
                        id: parent_id,
                    });
                    vacant.insert(Node {
                        sides,
                        commit: parent,
                        expanded: false,
                    });
                }
            }
        }
    }

    // Unreachable on a well-formed DAG: the root is an ancestor of every
    // commit.
    Err(MergeError::Internal(
        "commits share no common ancestor".into(),
    ))
}
