// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication from the remote source into the local store.
//!
//! Two modes share one apply path:
//!
//! - **Batch**: one-shot pull of all outstanding changes in bounded pages.
//!   Terminates once a short page arrives. A transport failure here is
//!   returned to the caller (fatal during `init()`).
//! - **Live**: a long-lived change-following session. Applies each page as it
//!   arrives, emits a notification per applied change, and reconnects with
//!   capped exponential backoff on transport failure. It never completes
//!   voluntarily; only the shutdown signal ends it.
//!
//! Conflict policy: last-write-wins at remote-assigned revision granularity.
//! Changes are applied in feed order and the store overwrites unconditionally;
//! there is no local merge.

use crate::error::Result;
use crate::metrics;
use crate::remote::{Change, RemoteSource, Seq};
use crate::retry::RetryConfig;
use crate::store::LocalStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Notification emitted for every change applied by the live session.
#[derive(Debug, Clone)]
pub struct AppliedChange {
    /// Feed position of the applied change.
    pub seq: Seq,
    /// Document id.
    pub id: String,
    /// Whether the change was a deletion.
    pub deleted: bool,
}

/// Pulls changes from a [`RemoteSource`] and applies them to a [`LocalStore`].
pub struct ReplicationEngine {
    remote: Arc<dyn RemoteSource>,
    store: LocalStore,
    batch_size: usize,
    retry: RetryConfig,
    /// Last feed position applied to the store. Shared with the snapshot
    /// manager so a dump records where to resume from.
    applied_seq: Arc<AtomicU64>,
    notify_tx: broadcast::Sender<AppliedChange>,
}

impl ReplicationEngine {
    /// Create an engine.
    ///
    /// `applied_seq` is shared with whoever persists the feed position
    /// (the snapshot manager records it in the dump header).
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        store: LocalStore,
        batch_size: usize,
        retry: RetryConfig,
        applied_seq: Arc<AtomicU64>,
    ) -> Self {
        let (notify_tx, _) = broadcast::channel(256);
        Self {
            remote,
            store,
            batch_size,
            retry,
            applied_seq,
            notify_tx,
        }
    }

    /// Subscribe to per-change notifications from the live session.
    pub fn subscribe(&self) -> broadcast::Receiver<AppliedChange> {
        self.notify_tx.subscribe()
    }

    /// Last feed position applied to the store.
    pub fn applied_seq(&self) -> Seq {
        self.applied_seq.load(Ordering::Acquire)
    }

    /// Apply one change to the store. Returns `false` for malformed changes
    /// that had to be skipped.
    async fn apply(&self, change: Change) -> bool {
        if change.deleted {
            self.store.remove(&change.id).await;
            return true;
        }
        match change.doc {
            Some(doc) => {
                self.store.put(doc).await;
                true
            }
            None => {
                warn!(id = %change.id, seq = change.seq, "Change missing document body, skipping");
                false
            }
        }
    }

    /// Pull all currently outstanding changes after `since` in bounded pages.
    ///
    /// Returns the feed position after the final page. Memory is bounded by
    /// `batch_size` regardless of dataset size.
    pub async fn batch(&self, since: Seq) -> Result<Seq> {
        let mut cursor = since;
        let mut total = 0usize;

        loop {
            let page_start = Instant::now();
            let page = self.remote.changes(cursor, self.batch_size).await?;
            metrics::record_batch_page(page.changes.len(), page_start.elapsed());

            let page_len = page.changes.len();
            for change in page.changes {
                if self.apply(change).await {
                    total += 1;
                }
            }

            cursor = page.last_seq;
            self.applied_seq.store(cursor, Ordering::Release);
            metrics::set_applied_seq(cursor);
            metrics::record_changes_applied("batch", page_len);

            // A short page means the feed has no further outstanding changes.
            if page_len < self.batch_size {
                break;
            }
        }

        info!(since, last_seq = cursor, applied = total, "Batch replication complete");
        Ok(cursor)
    }

    /// Run the live change-following session until shutdown.
    ///
    /// Transport failures are logged and followed by a backoff + reconnect;
    /// they never propagate. The session holds no ordering guarantee against
    /// concurrent reads: a `get()` racing an incoming change may observe the
    /// pre- or post-update value.
    pub async fn live(&self, since: Seq, mut shutdown_rx: watch::Receiver<bool>) {
        let mut cursor = since;
        let mut consecutive_errors = 0u32;

        info!(since, "Starting live replication session");

        loop {
            let result = tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }

                result = self.remote.follow(cursor) => result,
            };

            match result {
                Ok(page) => {
                    consecutive_errors = 0;
                    if page.changes.is_empty() {
                        // Long-poll timeout; nothing arrived.
                        debug!(cursor, "Live feed idle");
                        continue;
                    }

                    let mut applied = 0usize;
                    for change in page.changes {
                        let notice = AppliedChange {
                            seq: change.seq,
                            id: change.id.clone(),
                            deleted: change.deleted,
                        };
                        if self.apply(change).await {
                            applied += 1;
                            // No receivers is fine; notifications are best-effort.
                            let _ = self.notify_tx.send(notice);
                        }
                    }

                    cursor = page.last_seq;
                    self.applied_seq.store(cursor, Ordering::Release);
                    metrics::set_applied_seq(cursor);
                    metrics::record_changes_applied("live", applied);
                    debug!(cursor, applied, "Applied live changes");
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let delay = self.retry.delay_for_attempt(consecutive_errors);
                    warn!(
                        error = %e,
                        consecutive_errors,
                        delay_ms = delay.as_millis() as u64,
                        "Live session failed, reconnecting"
                    );
                    metrics::record_live_reconnect();

                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(cursor, "Live replication session stopped");
    }
}
