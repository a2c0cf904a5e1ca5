// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync coordinator.
//!
//! The main orchestrator that ties together:
//! - The local replica via [`LocalStore`]
//! - Initial and live replication via [`ReplicationEngine`]
//! - Snapshot persistence via [`SnapshotManager`](crate::snapshot::SnapshotManager)
//! - Periodic checkpoints via [`CheckpointScheduler`](crate::checkpoint::CheckpointScheduler)
//!
//! # Lifecycle
//!
//! The first [`init()`](SyncCoordinator::init) call runs, in order: restore
//! snapshot from disk (if any) → batch-replicate outstanding remote changes →
//! write a fresh snapshot → start the live replication session in the
//! background. Callers invoke [`get()`](SyncCoordinator::get), which
//! transparently awaits `init()` before reading the store.
//!
//! # Phase Transitions
//!
//! ```text
//!                first init()
//! Cold ───────────────────────→ Syncing
//!   ↑                              │
//!   │ reset()          (success)   │   (batch failure)
//!   │                              ↓
//!   └─────────── Failed ←──── Synced? no:
//!                  ↑               │
//!                  └───(failure)───┤
//!                        Synced ←──┘
//! ```
//!
//! - **Cold**: no sync attempted yet.
//! - **Syncing**: the one shared initial sync is in flight; concurrent
//!   `init()` callers all await the same outcome.
//! - **Synced**: initial sync done; live replication runs in the background.
//! - **Failed**: the batch phase failed. Sticky: every later `init()`/`get()`
//!   re-surfaces the same error until an explicit [`reset()`](SyncCoordinator::reset).
//!
//! A live-session failure never changes the phase; it is logged and the
//! session reconnects on its own.

use crate::checkpoint::CheckpointScheduler;
use crate::config::MirrorConfig;
use crate::error::{MirrorError, Result};
use crate::metrics;
use crate::remote::RemoteSource;
use crate::replicate::{AppliedChange, ReplicationEngine};
use crate::snapshot::SnapshotManager;
use crate::store::{Document, LocalStore};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Coordinator phase, for diagnostics.
///
/// See the module docs for the transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No sync attempted yet.
    Cold,
    /// The shared initial sync is in flight.
    Syncing,
    /// Initial sync complete; live replication running.
    Synced,
    /// Initial sync failed; call [`SyncCoordinator::reset`] to allow a retry.
    Failed,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Cold => write!(f, "Cold"),
            SyncPhase::Syncing => write!(f, "Syncing"),
            SyncPhase::Synced => write!(f, "Synced"),
            SyncPhase::Failed => write!(f, "Failed"),
        }
    }
}

type SharedInit = Shared<BoxFuture<'static, Result<()>>>;

/// Internal phase state; `Syncing` carries the shared in-flight future and
/// `Failed` the error every later caller re-observes.
enum InitState {
    Cold,
    Syncing(SharedInit),
    Synced,
    Failed(MirrorError),
}

type HandleSet = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// Orchestrates one local replica of one remote source.
///
/// The store is constructed here and owned exclusively by this coordinator;
/// running two coordinators against the same on-disk location is undefined
/// behavior and not guarded against.
pub struct SyncCoordinator {
    config: MirrorConfig,
    store: LocalStore,
    engine: Arc<ReplicationEngine>,
    snapshots: Arc<SnapshotManager>,
    state: Mutex<InitState>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    /// Background task handles (live session, checkpoint loop), drained on
    /// shutdown.
    handles: HandleSet,
}

impl SyncCoordinator {
    /// Create a coordinator and start its checkpoint loop.
    ///
    /// Must be called within a Tokio runtime: the checkpoint scheduler is
    /// spawned immediately (its first action happens only after one full
    /// checkpoint interval). The initial sync itself does not start until the
    /// first [`init()`](Self::init) call.
    pub fn new(config: MirrorConfig, remote: Arc<dyn RemoteSource>) -> Arc<Self> {
        let store = LocalStore::new();
        let applied_seq = Arc::new(AtomicU64::new(0));
        let engine = Arc::new(ReplicationEngine::new(
            remote,
            store.clone(),
            config.batch_size,
            crate::retry::RetryConfig::default(),
            Arc::clone(&applied_seq),
        ));
        let snapshots = Arc::new(SnapshotManager::new(
            config.store_root.clone(),
            config.store_name.clone(),
            store.clone(),
            applied_seq,
            config.batch_size,
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let coordinator = Arc::new(Self {
            store,
            engine,
            snapshots,
            state: Mutex::new(InitState::Cold),
            shutdown_tx,
            shutdown_rx: shutdown_rx.clone(),
            handles: Arc::new(Mutex::new(Vec::new())),
            config,
        });
        metrics::set_sync_phase("Cold");

        let checkpoint_handle = CheckpointScheduler::spawn(
            Arc::clone(&coordinator),
            coordinator.config.checkpoint_interval(),
            shutdown_rx,
        );
        coordinator.handles.lock().unwrap().push(checkpoint_handle);

        coordinator
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        match &*self.state.lock().unwrap() {
            InitState::Cold => SyncPhase::Cold,
            InitState::Syncing(_) => SyncPhase::Syncing,
            InitState::Synced => SyncPhase::Synced,
            InitState::Failed(_) => SyncPhase::Failed,
        }
    }

    /// Subscribe to per-change notifications from the live session.
    pub fn subscribe(&self) -> broadcast::Receiver<AppliedChange> {
        self.engine.subscribe()
    }

    /// Snapshot manager (for diagnostics and checkpoint accounting).
    pub fn snapshot_manager(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    /// Run the initial synchronization, or join the one already in flight.
    ///
    /// - `Synced`: idempotent no-op.
    /// - `Syncing`: awaits the shared in-flight outcome.
    /// - `Failed`: re-surfaces the stored error without retrying.
    /// - `Cold`: starts the sync. Order: load snapshot if present (a corrupt
    ///   snapshot is logged and forces a full resync) → batch-replicate
    ///   (failure here is fatal and surfaced to every waiter) → write a fresh
    ///   snapshot (failure logged) → spawn the live session.
    pub async fn init(&self) -> Result<()> {
        let shared = {
            let mut state = self.state.lock().unwrap();
            match &*state {
                InitState::Synced => return Ok(()),
                InitState::Failed(e) => return Err(e.clone()),
                InitState::Syncing(shared) => shared.clone(),
                InitState::Cold => {
                    metrics::set_sync_phase("Syncing");
                    let work = initial_sync(
                        Arc::clone(&self.engine),
                        Arc::clone(&self.snapshots),
                        self.store.clone(),
                        self.shutdown_rx.clone(),
                        Arc::clone(&self.handles),
                    )
                    .boxed()
                    .shared();
                    *state = InitState::Syncing(work.clone());
                    work
                }
            }
        };

        let result = shared.clone().await;

        let mut state = self.state.lock().unwrap();
        // Only the flight we awaited may publish its outcome. A waiter from
        // an earlier flight can be scheduled arbitrarily late; after a
        // reset() it would otherwise overwrite the state of a newer sync.
        if matches!(&*state, InitState::Syncing(current) if current.ptr_eq(&shared)) {
            *state = match &result {
                Ok(()) => {
                    metrics::set_sync_phase("Synced");
                    InitState::Synced
                }
                Err(e) => {
                    metrics::set_sync_phase("Failed");
                    InitState::Failed(e.clone())
                }
            };
        }
        result
    }

    /// Fetch a document body by id, transparently awaiting `init()`.
    pub async fn get(&self, id: &str) -> Result<serde_json::Value> {
        self.get_document(id).await.map(|doc| doc.body)
    }

    /// Fetch a full document by id, transparently awaiting `init()`.
    pub async fn get_document(&self, id: &str) -> Result<Document> {
        self.init().await?;
        self.store
            .get(id)
            .await
            .ok_or_else(|| MirrorError::NotFound(id.to_string()))
    }

    /// Recover from a failed initial sync: `Failed → Cold`.
    ///
    /// This is the only path out of `Failed`; nothing retries automatically.
    /// Returns `true` if a reset happened.
    pub fn reset(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if matches!(&*state, InitState::Failed(_)) {
            info!("Resetting failed sync state");
            metrics::set_sync_phase("Cold");
            *state = InitState::Cold;
            true
        } else {
            false
        }
    }

    /// One checkpoint pass: ensure the store is synced, then snapshot it.
    ///
    /// Failures are logged and recorded, never propagated; the next tick
    /// tries again.
    pub async fn checkpoint(&self) {
        if let Err(e) = self.init().await {
            warn!(error = %e, "Checkpoint skipped, store not synced");
            metrics::record_checkpoint(false);
            return;
        }
        match self.snapshots.dump().await {
            Ok(()) => metrics::record_checkpoint(true),
            Err(e) => {
                warn!(error = %e, "Checkpoint snapshot failed");
                metrics::record_checkpoint(false);
            }
        }
    }

    /// Shut down background tasks deterministically.
    ///
    /// Signals the live session and checkpoint loop, then drains their
    /// handles with a timeout. The store remains readable through `get()`.
    pub async fn shutdown(&self) {
        info!("Shutting down sync coordinator");
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = {
            let mut guard = self.handles.lock().unwrap();
            std::mem::take(&mut *guard)
        };

        let drain_timeout = std::time::Duration::from_secs(5);
        for (i, handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout(drain_timeout, handle).await {
                Ok(Ok(())) => debug!(task = i + 1, "Task completed"),
                Ok(Err(e)) => warn!(task = i + 1, error = %e, "Task panicked during shutdown"),
                Err(_) => warn!(task = i + 1, "Task timed out during shutdown"),
            }
        }

        info!("Sync coordinator stopped");
    }
}

/// The body of the one shared initial sync.
///
/// Runs outside `&self` so the shared future is `'static`; everything it
/// needs is cloned in.
async fn initial_sync(
    engine: Arc<ReplicationEngine>,
    snapshots: Arc<SnapshotManager>,
    store: LocalStore,
    shutdown_rx: watch::Receiver<bool>,
    handles: HandleSet,
) -> Result<()> {
    // Restore from disk when possible. A missing file is a cold start; a
    // corrupt one forces a full resync from sequence zero.
    let resume = match snapshots.load().await {
        Ok(Some(seq)) => seq,
        Ok(None) => 0,
        Err(e) => {
            warn!(error = %e, "Snapshot load failed, forcing full resync");
            store.clear().await;
            0
        }
    };

    // The batch phase is fatal on failure, with or without a restored
    // snapshot: a stale replica is not a substitute for the initial sync.
    let last_seq = engine.batch(resume).await?;

    // A fresh snapshot shortens the next cold start, but failing to write it
    // does not fail the sync.
    if let Err(e) = snapshots.dump().await {
        warn!(error = %e, "Initial snapshot write failed");
    }

    let live_engine = Arc::clone(&engine);
    let handle = tokio::spawn(async move {
        live_engine.live(last_seq, shutdown_rx).await;
    });
    handles.lock().unwrap().push(handle);

    info!(last_seq, "Initial sync complete, live session started");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    fn coordinator_with(remote: Arc<MemoryRemote>, root: &std::path::Path) -> Arc<SyncCoordinator> {
        SyncCoordinator::new(MirrorConfig::for_testing(root.to_str().unwrap()), remote)
    }

    #[tokio::test]
    async fn test_initial_phase_is_cold() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator_with(Arc::new(MemoryRemote::new()), dir.path());
        assert_eq!(coordinator.phase(), SyncPhase::Cold);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_init_reaches_synced() {
        let dir = tempdir().unwrap();
        let remote = Arc::new(MemoryRemote::new());
        remote.put("a", json!({"status": "OPERATING"}));

        let coordinator = coordinator_with(Arc::clone(&remote), dir.path());
        coordinator.init().await.unwrap();
        assert_eq!(coordinator.phase(), SyncPhase::Synced);

        // Idempotent.
        coordinator.init().await.unwrap();
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_get_awaits_init_transparently() {
        let dir = tempdir().unwrap();
        let remote = Arc::new(MemoryRemote::new());
        remote.put("a", json!({"status": "OPERATING"}));

        let coordinator = coordinator_with(remote, dir.path());
        // No explicit init() call.
        let body = coordinator.get("a").await.unwrap();
        assert_eq!(body, json!({"status": "OPERATING"}));
        assert_eq!(coordinator.phase(), SyncPhase::Synced);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_get_unknown_id_is_not_found() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator_with(Arc::new(MemoryRemote::new()), dir.path());
        let err = coordinator.get("nope").await.unwrap_err();
        assert_eq!(err, MirrorError::NotFound("nope".to_string()));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_reset_only_applies_to_failed() {
        let dir = tempdir().unwrap();
        let coordinator = coordinator_with(Arc::new(MemoryRemote::new()), dir.path());

        assert!(!coordinator.reset()); // Cold
        coordinator.init().await.unwrap();
        assert!(!coordinator.reset()); // Synced
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_init_writes_initial_snapshot() {
        let dir = tempdir().unwrap();
        let remote = Arc::new(MemoryRemote::new());
        remote.put("a", json!(1));

        let coordinator = coordinator_with(remote, dir.path());
        coordinator.init().await.unwrap();
        assert!(coordinator.snapshot_manager().canonical_path().exists());
        coordinator.shutdown().await;
    }

    /// Remote whose `changes()` parks on a gate each call and fails the
    /// first one, so a test can hold a sync open at a chosen point.
    struct GatedRemote {
        inner: MemoryRemote,
        gate: tokio::sync::Notify,
        fail_first: std::sync::atomic::AtomicBool,
    }

    impl GatedRemote {
        fn new() -> Self {
            Self {
                inner: MemoryRemote::new(),
                gate: tokio::sync::Notify::new(),
                fail_first: std::sync::atomic::AtomicBool::new(true),
            }
        }
    }

    impl crate::remote::RemoteSource for GatedRemote {
        fn changes(
            &self,
            since: crate::remote::Seq,
            limit: usize,
        ) -> crate::remote::BoxFuture<'_, crate::remote::ChangeBatch> {
            Box::pin(async move {
                self.gate.notified().await;
                if self.fail_first.swap(false, std::sync::atomic::Ordering::SeqCst) {
                    return Err(MirrorError::transport("changes", "injected failure"));
                }
                self.inner.changes(since, limit).await
            })
        }

        fn follow(
            &self,
            since: crate::remote::Seq,
        ) -> crate::remote::BoxFuture<'_, crate::remote::ChangeBatch> {
            self.inner.follow(since)
        }
    }

    #[tokio::test]
    async fn test_stale_waiter_does_not_clobber_newer_sync() {
        let dir = tempdir().unwrap();
        let remote = Arc::new(GatedRemote::new());
        remote.inner.put("a", json!({"status": "OPERATING"}));

        let mut config = MirrorConfig::for_testing(dir.path().to_str().unwrap());
        config.checkpoint_interval_ms = 60_000; // keep the checkpoint loop out
        let coordinator =
            SyncCoordinator::new(config, Arc::clone(&remote) as Arc<dyn RemoteSource>);

        // First sync: a driver task plus a second waiter parked on the same
        // flight that we deliberately leave unpolled until much later.
        let driver = {
            let c = Arc::clone(&coordinator);
            tokio::spawn(async move { c.init().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut stale_waiter = Box::pin(coordinator.init());
        assert!(futures::poll!(stale_waiter.as_mut()).is_pending());

        // Fail the first sync; only the driver observes it for now.
        remote.gate.notify_one();
        assert!(driver.await.unwrap().is_err());
        assert_eq!(coordinator.phase(), SyncPhase::Failed);

        // Recover, then start a fresh sync held open on the gate.
        assert!(coordinator.reset());
        let resync = {
            let c = Arc::clone(&coordinator);
            tokio::spawn(async move { c.init().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(coordinator.phase(), SyncPhase::Syncing);

        // The stale waiter finally runs. It must surface the old failure
        // without touching the newer in-flight sync.
        assert!(stale_waiter.await.is_err());
        assert_eq!(coordinator.phase(), SyncPhase::Syncing);

        remote.gate.notify_one();
        resync.await.unwrap().unwrap();
        assert_eq!(coordinator.phase(), SyncPhase::Synced);
        assert_eq!(
            coordinator.get("a").await.unwrap(),
            json!({"status": "OPERATING"})
        );
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_sync_phase_display() {
        assert_eq!(SyncPhase::Cold.to_string(), "Cold");
        assert_eq!(SyncPhase::Syncing.to_string(), "Syncing");
        assert_eq!(SyncPhase::Synced.to_string(), "Synced");
        assert_eq!(SyncPhase::Failed.to_string(), "Failed");
    }
}
