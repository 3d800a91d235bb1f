//! Merge strategy that delegates decisions to an external conflict
//! resolver.
//!
//! One merge is one *session*: the client opens a merge journal, binds
//! read-only snapshots of the left, right, and ancestor commits, and hands
//! the external [`ConflictResolver`] a [`MergeResultProvider`]. The resolver
//! pulls paged diffs and pushes decision batches through the provider; the
//! session task drains the provider channel one request at a time, so
//! operations are applied strictly in submission order. `done` commits the
//! journal; every other exit rolls it back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error, warn};

use converge_storage::{Commit, Journal, PageStorage};

use crate::errors::MergeError;
use crate::merge::diff::compute_page_change;
use crate::merge::strategy::{MergeOutcome, MergeStrategy};
use crate::page::PageManager;
use crate::protocol::{
    ConflictResolver, DiffResponse, MergedValue, NewValue, PageToken, Status, ValueSource,
    MAX_INLINE_DATA_SIZE,
};

/// Channel depth for resolver requests. Requests are processed one at a
/// time; the buffer only smooths bursts.
const REQUEST_QUEUE_DEPTH: usize = 16;

// ---------------------------------------------------------------------------
// Provider handle (resolver side)
// ---------------------------------------------------------------------------

enum ProviderRequest {
    GetLeftDiff {
        token: Option<PageToken>,
        reply: oneshot::Sender<DiffResponse>,
    },
    GetRightDiff {
        token: Option<PageToken>,
        reply: oneshot::Sender<DiffResponse>,
    },
    Merge {
        values: Vec<MergedValue>,
        reply: oneshot::Sender<Status>,
    },
    Done {
        reply: oneshot::Sender<Status>,
    },
}

/// Handle through which the external resolver pulls diffs and pushes merge
/// decisions.
///
/// Every call enqueues one request; the owning session processes requests
/// strictly in FIFO order, one at a time, awaiting all storage fan-out of a
/// `merge` batch before starting the next request. If the session is gone
/// (cancelled, failed, or its page closed), calls report
/// [`Status::InternalError`].
#[derive(Clone)]
pub struct MergeResultProvider {
    tx: mpsc::Sender<ProviderRequest>,
}

impl MergeResultProvider {
    /// One page of the diff `ancestor -> left`. Pass the previous response's
    /// token to continue; a `None` token in the response is the final page.
    pub async fn get_left_diff(&self, token: Option<PageToken>) -> DiffResponse {
        self.diff_request(|reply| ProviderRequest::GetLeftDiff { token, reply })
            .await
    }

    /// One page of the diff `ancestor -> right`.
    pub async fn get_right_diff(&self, token: Option<PageToken>) -> DiffResponse {
        self.diff_request(|reply| ProviderRequest::GetRightDiff { token, reply })
            .await
    }

    /// Apply one batch of merge decisions to the journal.
    pub async fn merge(&self, values: Vec<MergedValue>) -> Status {
        self.status_request(|reply| ProviderRequest::Merge { values, reply })
            .await
    }

    /// Commit the journal. On [`Status::Ok`] the merge commit is a new head.
    pub async fn done(&self) -> Status {
        self.status_request(|reply| ProviderRequest::Done { reply }).await
    }

    async fn diff_request(
        &self,
        build: impl FnOnce(oneshot::Sender<DiffResponse>) -> ProviderRequest,
    ) -> DiffResponse {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(build(reply_tx)).await.is_err() {
            return DiffResponse {
                status: Status::InternalError,
                change: None,
                next_token: None,
            };
        }
        reply_rx.await.unwrap_or(DiffResponse {
            status: Status::InternalError,
            change: None,
            next_token: None,
        })
    }

    async fn status_request(
        &self,
        build: impl FnOnce(oneshot::Sender<Status>) -> ProviderRequest,
    ) -> Status {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(build(reply_tx)).await.is_err() {
            return Status::InternalError;
        }
        reply_rx.await.unwrap_or(Status::InternalError)
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Strategy that delegates each merge to an external [`ConflictResolver`].
pub struct RemoteResolverStrategy {
    resolver: Arc<dyn ConflictResolver>,
    cancelled: AtomicBool,
    cancel_notify: Notify,
}

impl RemoteResolverStrategy {
    pub fn new(resolver: Arc<dyn ConflictResolver>) -> Self {
        Self {
            resolver,
            cancelled: AtomicBool::new(false),
            cancel_notify: Notify::new(),
        }
    }
}

#[async_trait]
impl MergeStrategy for RemoteResolverStrategy {
    async fn merge(
        &self,
        storage: Arc<dyn PageStorage>,
        page_manager: Arc<PageManager>,
        left: Arc<dyn Commit>,
        right: Arc<dyn Commit>,
        ancestor: Arc<dyn Commit>,
    ) -> Result<MergeOutcome, MergeError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Ok(MergeOutcome::Cancelled);
        }
        debug_assert!(
            left.timestamp() >= right.timestamp(),
            "left head must be the newer one"
        );

        let journal = match storage.start_merge_commit(&left.id(), &right.id()).await {
            Ok(journal) => journal,
            Err(e) => {
                error!(error = %e, "unable to start merge commit");
                return Err(e.into());
            }
        };

        let left_snapshot = page_manager.bind_page_snapshot(left.clone(), Vec::new());
        let right_snapshot = page_manager.bind_page_snapshot(right.clone(), Vec::new());
        let ancestor_snapshot = page_manager.bind_page_snapshot(ancestor.clone(), Vec::new());

        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let provider = MergeResultProvider { tx };
        let resolver = self.resolver.clone();
        // The resolver runs concurrently with the session loop. It owns its
        // snapshots independently and winds down on its own once the
        // provider handle stops answering.
        tokio::spawn(async move {
            resolver
                .resolve(left_snapshot, right_snapshot, ancestor_snapshot, provider)
                .await;
        });

        let session = MergeSession {
            storage,
            left,
            right,
            ancestor,
            journal: Some(journal),
            cancelled: &self.cancelled,
        };
        session.run(rx, &self.cancel_notify).await
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // notify_one stores a permit, so a session that is not yet parked on
        // the channel still observes the cancellation.
        self.cancel_notify.notify_one();
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

enum DiffSide {
    Left,
    Right,
}

struct MergeSession<'a> {
    storage: Arc<dyn PageStorage>,
    left: Arc<dyn Commit>,
    right: Arc<dyn Commit>,
    ancestor: Arc<dyn Commit>,
    journal: Option<Box<dyn Journal>>,
    cancelled: &'a AtomicBool,
}

impl MergeSession<'_> {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<ProviderRequest>,
        cancel: &Notify,
    ) -> Result<MergeOutcome, MergeError> {
        loop {
            if self.is_cancelled() {
                return self.finalize_cancelled();
            }
            let request = tokio::select! {
                _ = cancel.notified() => return self.finalize_cancelled(),
                request = rx.recv() => request,
            };
            let Some(request) = request else {
                warn!("conflict resolver disconnected before done, abandoning merge");
                self.rollback();
                return Err(MergeError::Protocol(
                    "resolver disconnected before done".into(),
                ));
            };

            match request {
                ProviderRequest::GetLeftDiff { token, reply } => {
                    if let Some(outcome) = self.handle_diff(DiffSide::Left, token, reply).await? {
                        return Ok(outcome);
                    }
                }
                ProviderRequest::GetRightDiff { token, reply } => {
                    if let Some(outcome) = self.handle_diff(DiffSide::Right, token, reply).await? {
                        return Ok(outcome);
                    }
                }
                ProviderRequest::Merge { values, reply } => {
                    match self.apply_batch(values).await {
                        Ok(()) => {
                            let _ = reply.send(Status::Ok);
                        }
                        Err(MergeError::Cancelled) => {
                            let _ = reply.send(Status::InternalError);
                            return self.finalize_cancelled();
                        }
                        Err(MergeError::Storage(e)) => {
                            let _ = reply.send(Status::from_storage_error(&e));
                            self.rollback();
                            return Err(e.into());
                        }
                        Err(e) => {
                            let _ = reply.send(Status::InternalError);
                            self.rollback();
                            return Err(e);
                        }
                    }
                }
                ProviderRequest::Done { reply } => {
                    return self.handle_done(reply).await;
                }
            }
        }
    }

    /// Serve one diff page. Returns `Ok(Some(..))` when the session must end
    /// because a cancellation landed mid-request.
    async fn handle_diff(
        &mut self,
        side: DiffSide,
        token: Option<PageToken>,
        reply: oneshot::Sender<DiffResponse>,
    ) -> Result<Option<MergeOutcome>, MergeError> {
        let commit = match side {
            DiffSide::Left => self.left.clone(),
            DiffSide::Right => self.right.clone(),
        };
        let result = compute_page_change(
            &*self.storage,
            &*self.ancestor,
            &*commit,
            token.as_ref(),
            MAX_INLINE_DATA_SIZE,
        )
        .await;

        if self.is_cancelled() {
            let _ = reply.send(DiffResponse {
                status: Status::InternalError,
                change: None,
                next_token: None,
            });
            self.rollback();
            return Ok(Some(MergeOutcome::Cancelled));
        }

        match result {
            Ok((change, next_token)) => {
                let status = if next_token.is_some() {
                    Status::PartialResult
                } else {
                    Status::Ok
                };
                let _ = reply.send(DiffResponse {
                    status,
                    change: Some(change),
                    next_token,
                });
                Ok(None)
            }
            Err(e) => {
                error!(error = %e, "unable to compute diff, aborting");
                let status = match &e {
                    MergeError::Storage(storage_err) => Status::from_storage_error(storage_err),
                    _ => Status::InternalError,
                };
                let _ = reply.send(DiffResponse {
                    status,
                    change: None,
                    next_token: None,
                });
                self.rollback();
                Err(e)
            }
        }
    }

    /// Materialize one batch of decisions into the journal, in order. Each
    /// value's object lookup/creation completes before the next begins.
    async fn apply_batch(&mut self, values: Vec<MergedValue>) -> Result<(), MergeError> {
        for value in values {
            if self.is_cancelled() {
                return Err(MergeError::Cancelled);
            }
            if self.journal.is_none() {
                return Err(MergeError::Protocol("merge after done".into()));
            }
            match value.source {
                ValueSource::Right => {
                    let entry = match self
                        .storage
                        .get_entry_from_commit(&*self.right, &value.key)
                        .await
                    {
                        Ok(entry) => entry,
                        Err(e) => {
                            if e.is_not_found() {
                                error!(
                                    key = %String::from_utf8_lossy(&value.key),
                                    "key not present in the right commit, unable to proceed"
                                );
                            }
                            return Err(e.into());
                        }
                    };
                    self.journal_mut()?
                        .put(&value.key, entry.object_id, value.priority)
                        .await?;
                }
                ValueSource::New(NewValue::Bytes(bytes)) => {
                    let object_id = self.storage.add_object_from_local(bytes).await?;
                    self.journal_mut()?
                        .put(&value.key, object_id, value.priority)
                        .await?;
                }
                ValueSource::New(NewValue::Reference { opaque_id }) => {
                    self.journal_mut()?
                        .put(&value.key, opaque_id, value.priority)
                        .await?;
                }
                ValueSource::Delete => {
                    self.journal_mut()?.delete(&value.key).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_done(
        &mut self,
        reply: oneshot::Sender<Status>,
    ) -> Result<MergeOutcome, MergeError> {
        let Some(journal) = self.journal.take() else {
            let _ = reply.send(Status::InternalError);
            return Err(MergeError::Protocol("done without an open journal".into()));
        };
        match journal.commit().await {
            Ok(commit) => {
                debug!(commit = %commit.id(), "merge commit created by external resolver");
                let _ = reply.send(Status::Ok);
                Ok(MergeOutcome::Merged(commit))
            }
            Err(e) => {
                error!(error = %e, "unable to commit merge journal");
                let _ = reply.send(Status::from_storage_error(&e));
                Err(e.into())
            }
        }
    }

    fn journal_mut(&mut self) -> Result<&mut Box<dyn Journal>, MergeError> {
        self.journal
            .as_mut()
            .ok_or_else(|| MergeError::Protocol("merge after done".into()))
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn finalize_cancelled(&mut self) -> Result<MergeOutcome, MergeError> {
        debug!("merge session cancelled, rolling back journal");
        self.rollback();
        Ok(MergeOutcome::Cancelled)
    }

    fn rollback(&mut self) {
        if let Some(journal) = self.journal.take() {
            journal.rollback();
        }
    }
}
