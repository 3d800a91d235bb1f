//! Pluggable merge strategies.

use std::sync::Arc;

use async_trait::async_trait;

use converge_storage::{Commit, PageStorage};

use crate::errors::MergeError;
use crate::page::PageManager;

/// Result of a completed merge attempt.
pub enum MergeOutcome {
    /// A merge commit was produced and is now a head.
    Merged(Arc<dyn Commit>),
    /// The strategy observed a cancellation request and abandoned work;
    /// any open journal was rolled back.
    Cancelled,
}

impl std::fmt::Debug for MergeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeOutcome::Merged(commit) => write!(f, "Merged({:?})", commit.id()),
            MergeOutcome::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// A pluggable conflict-resolution policy.
///
/// `merge` runs one merge; the returned future resolves exactly once, on
/// success, failure, or cancellation. A strategy instance may run many
/// sequential merges but never two concurrently.
///
/// The resolver passes the *newer* head as `left` and the older one as
/// `right`; untouched keys of a merge keep `left`'s values.
#[async_trait]
pub trait MergeStrategy: Send + Sync {
    async fn merge(
        &self,
        storage: Arc<dyn PageStorage>,
        page_manager: Arc<PageManager>,
        left: Arc<dyn Commit>,
        right: Arc<dyn Commit>,
        ancestor: Arc<dyn Commit>,
    ) -> Result<MergeOutcome, MergeError>;

    /// Request that the in-flight merge abandon work as soon as
    /// cooperatively possible. Cancellation is sticky: the resolver always
    /// replaces a cancelled strategy, so a cancelled instance never has to
    /// run again. The in-flight merge future still resolves.
    fn cancel(&self);
}
