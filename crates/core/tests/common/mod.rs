//! Shared helpers for merge-resolver integration tests.
//!
//! These are test utilities - not every helper is used by every test file.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use converge_core::errors::MergeError;
use converge_core::merge::strategy::{MergeOutcome, MergeStrategy};
use converge_core::page::PageManager;
use converge_storage::{
    Commit, CommitId, Journal, JournalType, KeyPriority, MemoryPageStorage, PageStorage,
    FIRST_PAGE_COMMIT_ID,
};

/// Install a test-friendly tracing subscriber once per process.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Commit `puts`/`deletes` on top of `parent` and return the new commit.
pub async fn create_commit(
    storage: &MemoryPageStorage,
    parent: &CommitId,
    puts: &[(&str, &str)],
    deletes: &[&str],
) -> Arc<dyn Commit> {
    let mut journal = storage
        .start_commit(parent, JournalType::Implicit)
        .await
        .expect("start commit");
    for (key, value) in puts {
        let object_id = storage
            .add_object_from_local(value.as_bytes().to_vec())
            .await
            .expect("add object");
        journal
            .put(key.as_bytes(), object_id, KeyPriority::Eager)
            .await
            .expect("journal put");
    }
    for key in deletes {
        journal.delete(key.as_bytes()).await.expect("journal delete");
    }
    journal.commit().await.expect("journal commit")
}

/// Read the value bound to `key` in `commit`, or `None` when absent.
pub async fn read_value(
    storage: &MemoryPageStorage,
    commit: &dyn Commit,
    key: &str,
) -> Option<Vec<u8>> {
    match storage.get_entry_from_commit(commit, key.as_bytes()).await {
        Ok(entry) => Some(storage.get_object(&entry.object_id).await.expect("object")),
        Err(err) if err.is_not_found() => None,
        Err(err) => panic!("unexpected storage error: {err}"),
    }
}

/// Wait (on the paused test clock) until the page has exactly `count` heads.
pub async fn wait_for_heads(storage: &MemoryPageStorage, count: usize) -> Vec<CommitId> {
    for _ in 0..10_000 {
        let heads = storage.head_commit_ids();
        if heads.len() == count {
            return heads;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!(
        "page did not reach {count} head(s); current heads: {:?}",
        storage.head_commit_ids()
    );
}

/// Two divergent children of the root, with scripted timestamps.
pub async fn fork_page(
    storage: &MemoryPageStorage,
) -> (Arc<dyn Commit>, Arc<dyn Commit>) {
    storage.set_next_timestamp(10);
    let first = create_commit(storage, &FIRST_PAGE_COMMIT_ID, &[("key", "first")], &[]).await;
    storage.set_next_timestamp(20);
    let second = create_commit(storage, &FIRST_PAGE_COMMIT_ID, &[("key", "second")], &[]).await;
    (first, second)
}

// ===========================================================================
// Test strategies
// ===========================================================================

/// Strategy that records invocations and resolves nothing.
pub struct CountingStrategy {
    pub merges: AtomicUsize,
    pub cancels: AtomicUsize,
}

impl CountingStrategy {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            merges: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MergeStrategy for CountingStrategy {
    async fn merge(
        &self,
        _storage: Arc<dyn PageStorage>,
        _page_manager: Arc<PageManager>,
        _left: Arc<dyn Commit>,
        _right: Arc<dyn Commit>,
        _ancestor: Arc<dyn Commit>,
    ) -> Result<MergeOutcome, MergeError> {
        self.merges.fetch_add(1, Ordering::SeqCst);
        Ok(MergeOutcome::Cancelled)
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Strategy whose merge parks until it is cancelled, for exercising the
/// mid-merge swap path.
pub struct BlockingStrategy {
    pub started_count: AtomicUsize,
    pub cancels: AtomicUsize,
    cancel_notify: Notify,
}

impl BlockingStrategy {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started_count: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            cancel_notify: Notify::new(),
        })
    }

    pub async fn wait_until_started(&self) {
        for _ in 0..10_000 {
            if self.started_count.load(Ordering::SeqCst) > 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("blocking strategy never started a merge");
    }
}

#[async_trait]
impl MergeStrategy for BlockingStrategy {
    async fn merge(
        &self,
        _storage: Arc<dyn PageStorage>,
        _page_manager: Arc<PageManager>,
        _left: Arc<dyn Commit>,
        _right: Arc<dyn Commit>,
        _ancestor: Arc<dyn Commit>,
    ) -> Result<MergeOutcome, MergeError> {
        self.started_count.fetch_add(1, Ordering::SeqCst);
        self.cancel_notify.notified().await;
        Ok(MergeOutcome::Cancelled)
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.cancel_notify.notify_one();
    }
}
