// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Snapshot persistence for the local store.
//!
//! A snapshot is one file holding the full store contents at a point in time:
//! a header line `{"version":1,"last_seq":N}` followed by one JSON document
//! per line. `last_seq` is the feed position the store had absorbed when the
//! snapshot was cloned, so a restored replica resumes batch replication from
//! there instead of sequence zero.
//!
//! # Atomicity
//!
//! Dumps are written to `<root>/<name>_new.db` and renamed over
//! `<root>/<name>.db` only after the writer has fully flushed and synced.
//! The canonical path therefore always holds either nothing or one complete,
//! internally consistent snapshot; an interrupted dump leaves only the
//! orphaned temporary file.
//!
//! # Single-flight
//!
//! Concurrent `dump()` callers are coalesced onto one shared in-flight write
//! via [`Flight`]; all of them observe that write's outcome.

use crate::error::{MirrorError, Result};
use crate::flight::Flight;
use crate::metrics;
use crate::remote::Seq;
use crate::store::{Document, LocalStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info, warn};

/// Snapshot format version. Bump when the on-disk layout changes.
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotHeader {
    version: u32,
    last_seq: Seq,
}

/// Serializes the local store to disk and bulk-loads it back.
pub struct SnapshotManager {
    root: PathBuf,
    name: String,
    store: LocalStore,
    /// Feed position recorded into dump headers; shared with the engine.
    applied_seq: Arc<AtomicU64>,
    /// Chunk size for bulk loads.
    batch_size: usize,
    flight: Flight<Result<()>>,
    /// Number of snapshot writes actually begun (diagnostics; lets callers
    /// distinguish coalesced triggers from real writes).
    writes_started: Arc<AtomicU64>,
}

impl SnapshotManager {
    /// Create a manager writing `<root>/<name>.db`.
    pub fn new(
        root: impl Into<PathBuf>,
        name: impl Into<String>,
        store: LocalStore,
        applied_seq: Arc<AtomicU64>,
        batch_size: usize,
    ) -> Self {
        Self {
            root: root.into(),
            name: name.into(),
            store,
            applied_seq,
            batch_size: batch_size.max(1),
            flight: Flight::new(),
            writes_started: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Canonical snapshot path.
    pub fn canonical_path(&self) -> PathBuf {
        self.root.join(format!("{}.db", self.name))
    }

    /// In-progress dump path, renamed over the canonical path on success.
    pub fn temp_path(&self) -> PathBuf {
        self.root.join(format!("{}_new.db", self.name))
    }

    /// Number of snapshot writes actually started.
    pub fn writes_started(&self) -> u64 {
        self.writes_started.load(Ordering::SeqCst)
    }

    /// Serialize the full store to the canonical snapshot path.
    ///
    /// A dump already in flight is joined instead of duplicated. The store is
    /// cloned at a point in time before writing; a live change applied during
    /// the write lands in the next checkpoint, not this one.
    pub async fn dump(&self) -> Result<()> {
        let store = self.store.clone();
        let temp = self.temp_path();
        let canonical = self.canonical_path();
        let applied_seq = Arc::clone(&self.applied_seq);
        let writes_started = Arc::clone(&self.writes_started);

        self.flight
            .run(move || async move {
                writes_started.fetch_add(1, Ordering::SeqCst);
                let start = Instant::now();
                let last_seq = applied_seq.load(Ordering::Acquire);
                let docs = store.contents().await;
                let doc_count = docs.len();

                match write_snapshot(&temp, &canonical, last_seq, docs).await {
                    Ok(()) => {
                        metrics::record_snapshot_write(doc_count, start.elapsed(), true);
                        info!(
                            path = %canonical.display(),
                            doc_count,
                            last_seq,
                            "Snapshot written"
                        );
                        Ok(())
                    }
                    Err(e) => {
                        metrics::record_snapshot_write(0, start.elapsed(), false);
                        warn!(error = %e, path = %temp.display(), "Snapshot write failed");
                        Err(e)
                    }
                }
            })
            .await
    }

    /// Bulk-load the canonical snapshot into the store.
    ///
    /// Returns `Ok(None)` when no canonical file exists (cold start, not an
    /// error) and `Ok(Some(last_seq))` after a successful load. Corrupt
    /// content is a [`MirrorError::Snapshot`]; callers treat it as non-fatal
    /// and fall back to a full network resync.
    pub async fn load(&self) -> Result<Option<Seq>> {
        let path = self.canonical_path();
        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No snapshot on disk, cold start");
                return Ok(None);
            }
            Err(e) => {
                metrics::record_snapshot_load(0, false);
                return Err(e.into());
            }
        };

        let result = self.load_from(file).await;
        match &result {
            Ok(Some((count, last_seq))) => {
                metrics::record_snapshot_load(*count, true);
                info!(
                    path = %path.display(),
                    doc_count = count,
                    last_seq,
                    "Snapshot loaded"
                );
            }
            _ => metrics::record_snapshot_load(0, false),
        }
        result.map(|r| r.map(|(_, seq)| seq))
    }

    async fn load_from(&self, file: tokio::fs::File) -> Result<Option<(usize, Seq)>> {
        let mut lines = BufReader::new(file).lines();

        let header_line = lines
            .next_line()
            .await?
            .ok_or_else(|| MirrorError::Snapshot("empty snapshot file".to_string()))?;
        let header: SnapshotHeader = serde_json::from_str(&header_line)
            .map_err(|e| MirrorError::Snapshot(format!("unreadable header: {e}")))?;
        if header.version != SNAPSHOT_VERSION {
            return Err(MirrorError::Snapshot(format!(
                "unsupported snapshot version {}",
                header.version
            )));
        }

        let mut count = 0usize;
        let mut pending: Vec<Document> = Vec::with_capacity(self.batch_size);
        while let Some(line) = lines.next_line().await? {
            if line.is_empty() {
                continue;
            }
            let doc: Document = serde_json::from_str(&line)
                .map_err(|e| MirrorError::Snapshot(format!("corrupt document record: {e}")))?;
            pending.push(doc);
            count += 1;
            if pending.len() >= self.batch_size {
                self.store.put_batch(std::mem::take(&mut pending)).await;
            }
        }
        if !pending.is_empty() {
            self.store.put_batch(pending).await;
        }

        self.applied_seq.store(header.last_seq, Ordering::Release);
        Ok(Some((count, header.last_seq)))
    }
}

/// Write the snapshot file: temp, flush, fsync, atomic rename.
async fn write_snapshot(
    temp: &Path,
    canonical: &Path,
    last_seq: Seq,
    docs: Vec<Document>,
) -> Result<()> {
    let file = tokio::fs::File::create(temp).await?;
    let mut writer = BufWriter::new(file);

    let header = serde_json::to_vec(&SnapshotHeader {
        version: SNAPSHOT_VERSION,
        last_seq,
    })
    .map_err(|e| MirrorError::Snapshot(e.to_string()))?;
    writer.write_all(&header).await?;
    writer.write_all(b"\n").await?;

    for doc in docs {
        let line = serde_json::to_vec(&doc).map_err(|e| MirrorError::Snapshot(e.to_string()))?;
        writer.write_all(&line).await?;
        writer.write_all(b"\n").await?;
    }

    writer.flush().await?;
    writer.into_inner().sync_all().await?;

    // The canonical path only ever sees a complete file.
    tokio::fs::rename(temp, canonical).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn manager_in(root: &Path, store: LocalStore, seq: u64) -> SnapshotManager {
        SnapshotManager::new(root, "test", store, Arc::new(AtomicU64::new(seq)), 3)
    }

    #[tokio::test]
    async fn test_paths() {
        let manager = manager_in(Path::new("/data"), LocalStore::new(), 0);
        assert_eq!(manager.canonical_path(), Path::new("/data/test.db"));
        assert_eq!(manager.temp_path(), Path::new("/data/test_new.db"));
    }

    #[tokio::test]
    async fn test_load_without_file_is_cold_start() {
        let dir = tempdir().unwrap();
        let manager = manager_in(dir.path(), LocalStore::new(), 0);
        assert_eq!(manager.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dump_then_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new();
        for i in 0..10 {
            store
                .put(Document::new(format!("doc-{i}"), "1", json!({"n": i})))
                .await;
        }
        let manager = manager_in(dir.path(), store.clone(), 10);
        manager.dump().await.unwrap();
        assert!(!manager.temp_path().exists());
        assert!(manager.canonical_path().exists());

        let fresh = LocalStore::new();
        let restored = manager_in(dir.path(), fresh.clone(), 0);
        let last_seq = restored.load().await.unwrap();

        assert_eq!(last_seq, Some(10));
        assert_eq!(fresh.contents().await, store.contents().await);
    }

    #[tokio::test]
    async fn test_dump_empty_store() {
        let dir = tempdir().unwrap();
        let manager = manager_in(dir.path(), LocalStore::new(), 0);
        manager.dump().await.unwrap();

        let fresh = LocalStore::new();
        let restored = manager_in(dir.path(), fresh.clone(), 0);
        assert_eq!(restored.load().await.unwrap(), Some(0));
        assert!(fresh.is_empty().await);
    }

    #[tokio::test]
    async fn test_load_rejects_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        tokio::fs::write(&path, b"this is not a snapshot\n")
            .await
            .unwrap();

        let manager = manager_in(dir.path(), LocalStore::new(), 0);
        let err = manager.load().await.unwrap_err();
        assert!(matches!(err, MirrorError::Snapshot(_)));
    }

    #[tokio::test]
    async fn test_load_rejects_unknown_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        tokio::fs::write(&path, b"{\"version\":99,\"last_seq\":0}\n")
            .await
            .unwrap();

        let manager = manager_in(dir.path(), LocalStore::new(), 0);
        let err = manager.load().await.unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[tokio::test]
    async fn test_failed_dump_leaves_canonical_untouched() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new();
        store.put(Document::new("a", "1", json!(1))).await;
        let manager = manager_in(dir.path(), store.clone(), 1);
        manager.dump().await.unwrap();
        let before = std::fs::read(manager.canonical_path()).unwrap();

        // Occupy the temp path with a directory so File::create fails.
        std::fs::create_dir(manager.temp_path()).unwrap();
        store.put(Document::new("b", "1", json!(2))).await;
        assert!(manager.dump().await.is_err());

        let after = std::fs::read(manager.canonical_path()).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_concurrent_dumps_coalesce() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new();
        for i in 0..500 {
            store
                .put(Document::new(format!("doc-{i}"), "1", json!({"n": i})))
                .await;
        }
        let manager = Arc::new(manager_in(dir.path(), store, 500));

        let dumps: Vec<_> = (0..6)
            .map(|_| {
                let m = Arc::clone(&manager);
                async move { m.dump().await }
            })
            .collect();
        let results = futures::future::join_all(dumps).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(manager.writes_started(), 1);
    }
}
