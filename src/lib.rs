//! # mirror-store
//!
//! A local-first replicated document store. One authoritative remote holds
//! the documents; this crate maintains a full local replica that serves every
//! read, stays current through a live change feed, and survives restarts via
//! periodic on-disk snapshots.
//!
//! ## Architecture
//!
//! ```text
//!                       ┌──────────────────────┐
//!                       │    Remote source      │
//!                       │  (HTTP changes feed   │
//!                       │   or in-memory log)   │
//!                       └───────┬──────────────┘
//!                               │ changes / follow
//!                               ▼
//!   ┌─────────────┐    ┌────────────────────┐
//!   │ Checkpoint   │    │ ReplicationEngine  │
//!   │ scheduler    │    │  batch + live      │
//!   └──────┬──────┘    └─────────┬──────────┘
//!          │ dump()              │ apply
//!          ▼                     ▼
//!   ┌─────────────┐    ┌────────────────────┐    ┌──────────────┐
//!   │ Snapshot     │◀──│    LocalStore      │───▶│  get() reads │
//!   │ manager      │    │  (full replica)    │    └──────────────┘
//!   └─────────────┘    └────────────────────┘
//!          │ load() on startup     ▲
//!          └──────────────────────┘
//! ```
//!
//! The [`SyncCoordinator`] orchestrates the lifecycle: the first `init()`
//! restores the snapshot, batch-replicates outstanding changes, writes a
//! fresh snapshot, and starts the live session. Concurrent `init()` calls
//! share one flight; `get()` awaits `init()` transparently.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mirror_store::{MemoryRemote, MirrorConfig, SyncCoordinator};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), mirror_store::MirrorError> {
//! let remote = Arc::new(MemoryRemote::new());
//! remote.put("lift-a", serde_json::json!({"status": "OPERATING"}));
//!
//! let coordinator = SyncCoordinator::new(MirrorConfig::default(), remote);
//! let body = coordinator.get("lift-a").await?;
//! assert_eq!(body["status"], "OPERATING");
//!
//! coordinator.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! For a real deployment, construct an [`HttpRemote`] from a validated
//! [`MirrorConfig`] instead of the in-memory remote.

pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod flight;
pub mod http;
pub mod metrics;
pub mod remote;
pub mod replicate;
pub mod retry;
pub mod snapshot;
pub mod store;

pub use config::MirrorConfig;
pub use coordinator::{SyncCoordinator, SyncPhase};
pub use error::{MirrorError, Result};
pub use http::HttpRemote;
pub use remote::{Change, ChangeBatch, MemoryRemote, RemoteSource, Seq};
pub use replicate::{AppliedChange, ReplicationEngine};
pub use retry::RetryConfig;
pub use snapshot::SnapshotManager;
pub use store::{Document, LocalStore};
