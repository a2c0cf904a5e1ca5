// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote source abstraction.
//!
//! Defines the interface to the authoritative remote document endpoint. The
//! replication engine only ever needs two things from a remote:
//!
//! 1. A bounded page of changes after a sequence ([`RemoteSource::changes`]) -
//!    drives the one-shot batch phase.
//! 2. A blocking wait for the next page ([`RemoteSource::follow`]) - drives
//!    the long-lived live session.
//!
//! This trait allows testing with mocks and decouples replication from the
//! wire protocol. [`HttpRemote`](crate::http::HttpRemote) implements it over
//! HTTP; [`MemoryRemote`] is an in-process implementation for tests and
//! standalone use.

use crate::error::Result;
use crate::store::Document;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use tokio::sync::Notify;

/// Position in the remote change feed. Monotonically increasing.
pub type Seq = u64;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// One entry from the remote change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Feed position of this change.
    pub seq: Seq,
    /// Document id the change applies to.
    pub id: String,
    /// Whether the document was deleted.
    pub deleted: bool,
    /// The document at this revision. `None` for deletions.
    pub doc: Option<Document>,
}

/// A bounded page of changes.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    /// Changes in feed order.
    pub changes: Vec<Change>,
    /// Feed position after this page. Equals the request's `since` when the
    /// page is empty.
    pub last_seq: Seq,
}

/// Handle to the authoritative remote document endpoint.
pub trait RemoteSource: Send + Sync + 'static {
    /// Fetch up to `limit` changes strictly after `since`.
    ///
    /// An empty page means no outstanding changes remain.
    fn changes(&self, since: Seq, limit: usize) -> BoxFuture<'_, ChangeBatch>;

    /// Wait until at least one change after `since` exists, then return a
    /// page. May return an empty page on a long-poll timeout; callers simply
    /// re-issue the wait.
    fn follow(&self, since: Seq) -> BoxFuture<'_, ChangeBatch>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// MemoryRemote: in-process remote for tests and standalone mode
// ═══════════════════════════════════════════════════════════════════════════════

/// Page size served by `follow()` implementations.
pub const FOLLOW_PAGE: usize = 100;

#[derive(Debug, Default)]
struct MemoryState {
    log: Vec<Change>,
    seq: Seq,
}

/// An in-process [`RemoteSource`] backed by an append-only change log.
///
/// Writers call [`put()`](Self::put) / [`delete()`](Self::delete); long-poll
/// followers are woken through a [`Notify`].
///
/// # Example
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use mirror_store::remote::{MemoryRemote, RemoteSource};
///
/// let remote = MemoryRemote::new();
/// remote.put("a", serde_json::json!({"status": "OPERATING"}));
///
/// let page = remote.changes(0, 10).await.unwrap();
/// assert_eq!(page.changes.len(), 1);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
    notify: Notify,
}

impl MemoryRemote {
    /// Create an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a document, assigning the next sequence and an opaque revision.
    /// Returns the assigned sequence.
    pub fn put(&self, id: &str, body: serde_json::Value) -> Seq {
        let seq = {
            let mut state = self.state.lock().unwrap();
            state.seq += 1;
            let seq = state.seq;
            let rev = format!("{}-{:x}", seq, seq.wrapping_mul(0x9e3779b9));
            state.log.push(Change {
                seq,
                id: id.to_string(),
                deleted: false,
                doc: Some(Document::new(id, rev, body)),
            });
            seq
        };
        self.notify.notify_waiters();
        seq
    }

    /// Record a deletion for `id`. Returns the assigned sequence.
    pub fn delete(&self, id: &str) -> Seq {
        let seq = {
            let mut state = self.state.lock().unwrap();
            state.seq += 1;
            let seq = state.seq;
            state.log.push(Change {
                seq,
                id: id.to_string(),
                deleted: true,
                doc: None,
            });
            seq
        };
        self.notify.notify_waiters();
        seq
    }

    /// Current head of the change feed.
    pub fn head_seq(&self) -> Seq {
        self.state.lock().unwrap().seq
    }

    fn page_after(&self, since: Seq, limit: usize) -> ChangeBatch {
        let state = self.state.lock().unwrap();
        let changes: Vec<Change> = state
            .log
            .iter()
            .filter(|c| c.seq > since)
            .take(limit)
            .cloned()
            .collect();
        let last_seq = changes.last().map(|c| c.seq).unwrap_or(since);
        ChangeBatch { changes, last_seq }
    }
}

impl RemoteSource for MemoryRemote {
    fn changes(&self, since: Seq, limit: usize) -> BoxFuture<'_, ChangeBatch> {
        Box::pin(async move { Ok(self.page_after(since, limit)) })
    }

    fn follow(&self, since: Seq) -> BoxFuture<'_, ChangeBatch> {
        Box::pin(async move {
            loop {
                // Register for wakeup before checking, so a write landing
                // between the check and the await is not lost.
                let notified = self.notify.notified();
                let page = self.page_after(since, FOLLOW_PAGE);
                if !page.changes.is_empty() {
                    return Ok(page);
                }
                notified.await;
            }
        })
    }
}
