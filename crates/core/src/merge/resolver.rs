//! Per-page merge resolver.
//!
//! One [`MergeResolver`] lives for as long as its page is open. It watches
//! commit arrivals (local and sync), debounces with a randomized delay, and
//! whenever the page has more than one head, drives the installed strategy
//! through exactly one merge at a time until the heads reconverge.

use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, error, info, warn};

use converge_storage::{
    ChangeSource, Commit, CommitId, CommitWatcher, PageStorage, WatcherToken,
};

use crate::environment::Environment;
use crate::merge::ancestor::find_common_ancestor;
use crate::merge::strategy::{MergeOutcome, MergeStrategy};
use crate::page::PageManager;

type EmptyCallback = Box<dyn Fn() + Send + Sync>;
type DestroyedCallback = Box<dyn FnOnce() + Send + Sync>;

struct ControllerState {
    /// Currently installed strategy; `None` keeps the resolver inert.
    strategy: Option<Arc<dyn MergeStrategy>>,
    /// Replacement installed while a merge was in flight; swapped in by the
    /// cleanup of that merge.
    next_strategy: Option<Arc<dyn MergeStrategy>>,
    merge_in_progress: bool,
}

/// The per-page conflict-resolution state machine.
///
/// Created with the storage collaborator, the environment, and a destructor
/// callback; registers itself as a commit watcher. Must be constructed on a
/// Tokio runtime: conflict checks are scheduled as delayed tasks holding a
/// weak handle, so a dropped resolver simply stops reacting.
pub struct MergeResolver {
    storage: Arc<dyn PageStorage>,
    environment: Arc<Environment>,
    state: Mutex<ControllerState>,
    page_manager: Mutex<Option<Arc<PageManager>>>,
    on_empty: Mutex<Option<EmptyCallback>>,
    on_destroyed: Mutex<Option<DestroyedCallback>>,
    watcher_token: Mutex<Option<WatcherToken>>,
    weak_self: Weak<MergeResolver>,
}

impl MergeResolver {
    pub fn new(
        storage: Arc<dyn PageStorage>,
        environment: Arc<Environment>,
        on_destroyed: impl FnOnce() + Send + Sync + 'static,
    ) -> Arc<Self> {
        let this = Arc::new_cyclic(|weak| Self {
            storage,
            environment,
            state: Mutex::new(ControllerState {
                strategy: None,
                next_strategy: None,
                merge_in_progress: false,
            }),
            page_manager: Mutex::new(None),
            on_empty: Mutex::new(None),
            on_destroyed: Mutex::new(Some(Box::new(on_destroyed))),
            watcher_token: Mutex::new(None),
            weak_self: weak.clone(),
        });
        let watcher: Arc<dyn CommitWatcher> = this.clone();
        let watcher: Weak<dyn CommitWatcher> = Arc::downgrade(&watcher);
        let token = this.storage.add_commit_watcher(watcher);
        *lock(&this.watcher_token) = Some(token);
        this.post_check_conflicts();
        this
    }

    /// `true` when no merge is in flight; the enclosing page uses this to
    /// decide idleness.
    pub fn is_empty(&self) -> bool {
        !lock(&self.state).merge_in_progress
    }

    /// Install a callback fired every time a merge finishes (whatever the
    /// outcome). The callback may drop this resolver.
    pub fn set_on_empty(&self, callback: impl Fn() + Send + Sync + 'static) {
        *lock(&self.on_empty) = Some(Box::new(callback));
    }

    /// Install the page manager. Must be called exactly once before the
    /// first merge; the resolver skips conflict checks until it is set.
    pub fn set_page_manager(&self, page_manager: Arc<PageManager>) {
        {
            let mut slot = lock(&self.page_manager);
            debug_assert!(slot.is_none(), "page manager must be set exactly once");
            *slot = Some(page_manager);
        }
        self.post_check_conflicts();
    }

    /// Install (or clear) the merge strategy.
    ///
    /// If a merge is in flight, the new strategy is parked in
    /// `next_strategy` and the current one is cancelled; the in-flight merge
    /// finishes (successfully or cancelled) and its cleanup performs the
    /// swap and re-posts a conflict check.
    pub fn set_merge_strategy(&self, strategy: Option<Arc<dyn MergeStrategy>>) {
        enum Action {
            Cancel(Arc<dyn MergeStrategy>),
            Post,
            Nothing,
        }
        let action = {
            let mut state = lock(&self.state);
            if state.merge_in_progress {
                debug_assert!(state.strategy.is_some());
                state.next_strategy = strategy;
                match state.strategy.clone() {
                    Some(current) => Action::Cancel(current),
                    None => Action::Nothing,
                }
            } else {
                state.strategy = strategy;
                if state.strategy.is_some() {
                    Action::Post
                } else {
                    Action::Nothing
                }
            }
        };
        match action {
            Action::Cancel(current) => {
                debug!("strategy replaced mid-merge, cancelling current merge");
                current.cancel();
            }
            Action::Post => self.post_check_conflicts(),
            Action::Nothing => {}
        }
    }

    /// Schedule a conflict check after a randomized delay drawn from
    /// `[0, max_merging_delay]`. The randomization decorrelates resolver
    /// instances that raced to observe the same multi-head condition.
    fn post_check_conflicts(&self) {
        let delay = self.environment.next_merge_delay();
        let weak = self.weak_self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(this) = weak.upgrade() {
                this.check_conflicts().await;
            }
        });
    }

    async fn check_conflicts(self: Arc<Self>) {
        {
            let state = lock(&self.state);
            if state.strategy.is_none() || state.merge_in_progress {
                return;
            }
        }
        if lock(&self.page_manager).is_none() {
            debug!("page manager not installed yet, skipping conflict check");
            return;
        }

        let heads = self.storage.head_commit_ids();
        if heads.len() <= 1 {
            // No conflict.
            return;
        }
        self.resolve_conflicts(heads).await;
    }

    async fn resolve_conflicts(&self, heads: Vec<CommitId>) {
        debug_assert!(heads.len() >= 2);
        debug_assert!(heads.windows(2).all(|pair| pair[0] <= pair[1]));

        let strategy = {
            let mut state = lock(&self.state);
            if state.merge_in_progress {
                return;
            }
            let Some(strategy) = state.strategy.clone() else {
                return;
            };
            state.merge_in_progress = true;
            strategy
        };
        // Every exit path below runs the scoped cleanup: clear the
        // in-progress flag, swap in a pending strategy, re-post a check, and
        // fire on_empty last.
        let _cleanup = MergeCleanup {
            resolver: self.weak_self.clone(),
        };

        // Only the first two heads are merged per round; the re-posted check
        // picks up whatever conflict remains.
        let (first, second) = tokio::join!(
            self.storage.get_commit(&heads[0]),
            self.storage.get_commit(&heads[1]),
        );
        let (first, second) = match (first, second) {
            (Ok(first), Ok(second)) => (first, second),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "failed to retrieve head commits");
                return;
            }
        };

        // Benign race: both heads already carry the same content, reached
        // via different paths. Merge without invoking any strategy.
        if first.root_id() == second.root_id() {
            debug!(
                first = %first.id(),
                second = %second.id(),
                "heads have identical content, merging without a strategy"
            );
            if let Err(e) = self.storage.merge_identical_commits(first, second).await {
                error!(error = %e, "unable to merge identical commits");
            }
            return;
        }

        if lock(&self.state).next_strategy.is_some() {
            return;
        }

        // Rank the two heads; the strategy receives the newer one as `left`
        // so strategies may assume left.timestamp >= right.timestamp.
        let (older, newer) =
            if (first.timestamp(), first.id()) <= (second.timestamp(), second.id()) {
                (first, second)
            } else {
                (second, first)
            };

        let ancestor =
            match find_common_ancestor(&*self.storage, newer.clone(), older.clone()).await {
                Ok(ancestor) => ancestor,
                Err(e) => {
                    error!(error = %e, "failed to find common ancestor of head commits");
                    return;
                }
            };

        if lock(&self.state).next_strategy.is_some() {
            return;
        }

        let Some(page_manager) = lock(&self.page_manager).clone() else {
            warn!("page manager disappeared before merge, bailing out");
            return;
        };

        debug!(
            left = %newer.id(),
            right = %older.id(),
            ancestor = %ancestor.id(),
            "starting merge"
        );
        match strategy
            .merge(self.storage.clone(), page_manager, newer, older, ancestor)
            .await
        {
            Ok(MergeOutcome::Merged(commit)) => {
                info!(commit = %commit.id(), "conflicting heads merged");
            }
            Ok(MergeOutcome::Cancelled) => debug!("merge cancelled"),
            Err(e) => error!(error = %e, "merge failed"),
        }
    }
}

impl CommitWatcher for MergeResolver {
    fn on_new_commits(&self, _commits: &[Arc<dyn Commit>], _source: ChangeSource) {
        self.post_check_conflicts();
    }
}

impl Drop for MergeResolver {
    fn drop(&mut self) {
        if let Some(token) = lock(&self.watcher_token).take() {
            self.storage.remove_commit_watcher(token);
        }
        if let Some(on_destroyed) = lock(&self.on_destroyed).take() {
            on_destroyed();
        }
    }
}

/// Scoped cleanup armed by `resolve_conflicts`; runs on every exit path,
/// including a dropped-mid-merge future.
struct MergeCleanup {
    resolver: Weak<MergeResolver>,
}

impl Drop for MergeCleanup {
    fn drop(&mut self) {
        let Some(resolver) = self.resolver.upgrade() else {
            return;
        };
        {
            let mut state = lock(&resolver.state);
            state.merge_in_progress = false;
            if let Some(next) = state.next_strategy.take() {
                debug!("installing replacement merge strategy");
                state.strategy = Some(next);
            }
        }
        resolver.post_check_conflicts();
        // on_empty is fired last and outside all locks: the callback may
        // drop the resolver.
        let callback = lock(&resolver.on_empty).take();
        if let Some(callback) = callback {
            callback();
            let mut slot = lock(&resolver.on_empty);
            if slot.is_none() {
                *slot = Some(callback);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
