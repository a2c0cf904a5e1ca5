// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the mirror store.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Transport` | Yes | Network failure talking to the remote source |
//! | `Config` | No | Missing or invalid required settings |
//! | `NotFound` | No | Requested document id absent from the local store |
//! | `Snapshot` | No | Unreadable, corrupt, or unwritable snapshot file |
//!
//! # Waiter Semantics
//!
//! `MirrorError` is `Clone`: when the initial sync fails, every caller parked
//! on the shared in-flight `init()` future receives the same error value, and
//! later callers re-observe it from the `Failed` phase until an explicit
//! [`reset()`](crate::coordinator::SyncCoordinator::reset). Variants therefore
//! carry message strings rather than non-cloneable sources.

use thiserror::Error;

/// Result type alias for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Errors that can occur while mirroring the remote store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MirrorError {
    /// Invalid or missing configuration.
    ///
    /// Occurs during construction if required settings are absent.
    /// Not retryable - fix the configuration and restart.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network failure during replication.
    ///
    /// Fatal when it happens inside the initial batch phase; caught and
    /// retried with backoff inside the live session.
    #[error("Transport error ({operation}): {message}")]
    Transport { operation: String, message: String },

    /// Requested document id is not present in the local store.
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Snapshot file could not be read or written.
    ///
    /// A corrupt snapshot on `load()` is non-fatal (forces a full network
    /// resync); a failed `dump()` leaves the previous canonical file intact.
    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

impl MirrorError {
    /// Create a Transport error with operation context.
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable.
    ///
    /// Only transport failures are transient; everything else needs either a
    /// config fix, a different document id, or a fresh sync.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<std::io::Error> for MirrorError {
    fn from(e: std::io::Error) -> Self {
        Self::Snapshot(e.to_string())
    }
}
