// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Periodic checkpoint loop.
//!
//! A background task that, once per configured interval, asks the coordinator
//! to checkpoint: ensure the store is synced, then snapshot it to disk. The
//! first checkpoint happens one full interval after startup, not immediately;
//! the coordinator's own `init()` already writes the initial snapshot.
//!
//! The loop is cancellable via the shared shutdown signal and never exits on
//! its own. Checkpoint failures are logged by the coordinator and retried on
//! the next tick.

use crate::coordinator::SyncCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Spawns and owns nothing; a namespace for the checkpoint task.
pub struct CheckpointScheduler;

impl CheckpointScheduler {
    /// Spawn the checkpoint loop. Must be called within a Tokio runtime.
    ///
    /// The returned handle completes once the shutdown signal fires.
    pub fn spawn(
        coordinator: Arc<SyncCoordinator>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Checkpoint loop started");

            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The interval fires immediately on creation; consume that tick so
            // the first checkpoint waits one full period.
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }

                    _ = timer.tick() => {
                        debug!("Checkpoint tick");
                        coordinator.checkpoint().await;
                    }
                }
            }

            info!("Checkpoint loop stopped");
        })
    }
}
