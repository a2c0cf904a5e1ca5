//! Instrumented remote source for integration tests.
//!
//! Wraps a [`MemoryRemote`] with call counting and failure injection so tests
//! can assert how many feed requests replication actually made and how the
//! coordinator behaves when the remote is flaky or unreachable.

use mirror_store::error::{MirrorError, Result};
use mirror_store::remote::{BoxFuture, ChangeBatch, MemoryRemote, RemoteSource, Seq};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// A [`RemoteSource`] that counts calls and can be told to fail.
#[derive(Default)]
pub struct MockRemote {
    inner: MemoryRemote,
    changes_calls: AtomicUsize,
    follow_calls: AtomicUsize,
    /// Fail this many requests before recovering.
    failures_left: AtomicUsize,
    /// When set, every request fails until cleared.
    unreachable: AtomicBool,
    /// `since` value of the most recent `changes()` request.
    last_changes_since: AtomicU64,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document into the underlying feed.
    pub fn seed(&self, id: &str, body: serde_json::Value) -> Seq {
        self.inner.put(id, body)
    }

    pub fn put(&self, id: &str, body: serde_json::Value) -> Seq {
        self.inner.put(id, body)
    }

    pub fn delete(&self, id: &str) -> Seq {
        self.inner.delete(id)
    }

    /// Make the next `count` requests fail, then recover.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Toggle hard unreachability.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn changes_calls(&self) -> usize {
        self.changes_calls.load(Ordering::SeqCst)
    }

    pub fn follow_calls(&self) -> usize {
        self.follow_calls.load(Ordering::SeqCst)
    }

    /// `since` of the most recent `changes()` request; tells a restore test
    /// where replication actually resumed from.
    pub fn last_changes_since(&self) -> Seq {
        self.last_changes_since.load(Ordering::SeqCst)
    }

    fn check_failure(&self, operation: &'static str) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(MirrorError::transport(operation, "remote unreachable"));
        }
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(MirrorError::transport(operation, "injected failure"));
        }
        Ok(())
    }
}

impl RemoteSource for MockRemote {
    fn changes(&self, since: Seq, limit: usize) -> BoxFuture<'_, ChangeBatch> {
        Box::pin(async move {
            self.changes_calls.fetch_add(1, Ordering::SeqCst);
            self.last_changes_since.store(since, Ordering::SeqCst);
            self.check_failure("changes")?;
            self.inner.changes(since, limit).await
        })
    }

    fn follow(&self, since: Seq) -> BoxFuture<'_, ChangeBatch> {
        Box::pin(async move {
            self.follow_calls.fetch_add(1, Ordering::SeqCst);
            self.check_failure("follow")?;
            self.inner.follow(since).await
        })
    }
}
