// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local document store.
//!
//! An in-memory keyed map of [`Document`]s, shared via `Arc` and guarded by a
//! `tokio` read-write lock. This is the sole read path for callers; durability
//! comes from [`SnapshotManager`](crate::snapshot::SnapshotManager) writing
//! the full contents to disk.
//!
//! Last-write-wins is delegated to the remote protocol: the replication engine
//! applies changes in feed order and the store overwrites unconditionally, so
//! the remote-assigned revision of the latest applied change always wins.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A keyed structured record held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Unique key.
    pub id: String,
    /// Opaque version token assigned by the remote store.
    pub rev: String,
    /// Structured payload.
    pub body: serde_json::Value,
}

impl Document {
    /// Convenience constructor.
    pub fn new(id: impl Into<String>, rev: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            rev: rev.into(),
            body,
        }
    }
}

/// The local replica of the remote document store.
///
/// Cheap to clone; all clones share the same underlying map. The store is
/// exclusively owned by the [`SyncCoordinator`](crate::coordinator::SyncCoordinator)
/// that created it; external callers read through the coordinator's `get()`.
#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    docs: Arc<RwLock<HashMap<String, Document>>>,
}

impl LocalStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a document by id.
    pub async fn get(&self, id: &str) -> Option<Document> {
        self.docs.read().await.get(id).cloned()
    }

    /// Insert or overwrite a document (last write wins).
    pub async fn put(&self, doc: Document) {
        self.docs.write().await.insert(doc.id.clone(), doc);
    }

    /// Insert a batch of documents under one lock acquisition.
    pub async fn put_batch(&self, docs: Vec<Document>) {
        let mut map = self.docs.write().await;
        for doc in docs {
            map.insert(doc.id.clone(), doc);
        }
    }

    /// Remove a document by id, returning whether it was present.
    pub async fn remove(&self, id: &str) -> bool {
        self.docs.write().await.remove(id).is_some()
    }

    /// Drop all documents. Used before a full resync after a bad snapshot.
    pub async fn clear(&self) {
        self.docs.write().await.clear();
    }

    /// Number of documents.
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    /// Point-in-time clone of the full contents, sorted by id.
    ///
    /// This is what a snapshot serializes. The clone happens under the read
    /// lock, so a live-replication update applied after the clone is not part
    /// of the snapshot and will be picked up by the next checkpoint.
    pub async fn contents(&self) -> Vec<Document> {
        let map = self.docs.read().await;
        let mut docs: Vec<Document> = map.values().cloned().collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        docs
    }
}
