//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Batch and live replication progress
//! - Snapshot writes and loads
//! - Sync phase transitions
//! - Live session reconnects
//!
//! All metrics are prefixed with `mirror_` and follow Prometheus conventions:
//! counters end in `_total`, gauges represent current state, histograms track
//! distributions.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record changes applied to the local store.
///
/// `source` is `"batch"` or `"live"`.
pub fn record_changes_applied(source: &str, count: usize) {
    counter!("mirror_changes_applied_total", "source" => source.to_string())
        .increment(count as u64);
}

/// Record one page pulled during batch replication.
pub fn record_batch_page(count: usize, latency: Duration) {
    counter!("mirror_batch_pages_total").increment(1);
    histogram!("mirror_batch_page_duration_seconds").record(latency.as_secs_f64());
    histogram!("mirror_batch_page_size").record(count as f64);
}

/// Record a live session reconnect after a transport failure.
pub fn record_live_reconnect() {
    counter!("mirror_live_reconnects_total").increment(1);
}

/// Record the current applied feed position.
pub fn set_applied_seq(seq: u64) {
    gauge!("mirror_applied_seq").set(seq as f64);
}

/// Record a snapshot write attempt.
pub fn record_snapshot_write(doc_count: usize, latency: Duration, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("mirror_snapshot_writes_total", "status" => status).increment(1);
    if success {
        histogram!("mirror_snapshot_write_duration_seconds").record(latency.as_secs_f64());
        gauge!("mirror_snapshot_doc_count").set(doc_count as f64);
    }
}

/// Record a snapshot load.
pub fn record_snapshot_load(doc_count: usize, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("mirror_snapshot_loads_total", "status" => status).increment(1);
    if success {
        gauge!("mirror_snapshot_doc_count").set(doc_count as f64);
    }
}

/// Record the coordinator's sync phase.
///
/// Exactly one phase label reads 1 at a time; entering a phase zeroes the
/// others so a transition never leaves two phases reporting active.
pub fn set_sync_phase(phase: &str) {
    for known in ["Cold", "Syncing", "Synced", "Failed"] {
        let value = if known == phase { 1.0 } else { 0.0 };
        gauge!("mirror_sync_phase", "phase" => known).set(value);
    }
}

/// Record a checkpoint tick outcome.
pub fn record_checkpoint(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("mirror_checkpoints_total", "status" => status).increment(1);
}
