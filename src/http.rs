// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP remote source.
//!
//! Speaks the CouchDB-style changes-feed protocol:
//!
//! - `changes(since, limit)` issues
//!   `GET {base}/_changes?include_docs=true&since=N&limit=M`
//! - `follow(since)` adds `feed=longpoll&timeout=30000`, so the request parks
//!   server-side until a change arrives or the long-poll window expires
//!   (an expired window returns an empty page, which the live session treats
//!   as idle).
//!
//! Every request carries basic auth and the configured client identifier.
//! Remote sequence values arrive either as bare integers or as CouchDB-style
//! `"N-opaquehash"` strings; only the numeric prefix is meaningful here.

use crate::config::MirrorConfig;
use crate::error::{MirrorError, Result};
use crate::remote::{BoxFuture, Change, ChangeBatch, RemoteSource, Seq, FOLLOW_PAGE};
use crate::store::Document;
use serde::Deserialize;
use tracing::{debug, trace};

/// Long-poll window for `follow()` requests, in milliseconds.
const LONGPOLL_TIMEOUT_MS: u64 = 30_000;

/// Header carrying the configured client identifier.
const CLIENT_ID_HEADER: &str = "x-client-id";

/// [`RemoteSource`] backed by an HTTP changes feed.
#[derive(Debug)]
pub struct HttpRemote {
    client: reqwest::Client,
    base: String,
    username: String,
    password: String,
    client_id: String,
}

impl HttpRemote {
    /// Build a remote from config. Fails when the endpoint or credentials
    /// are missing.
    pub fn new(config: &MirrorConfig) -> Result<Self> {
        config.validate_remote()?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| MirrorError::transport("client", e.to_string()))?;
        Ok(Self {
            client,
            base: config.remote_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            client_id: config.client_id.clone(),
        })
    }

    async fn fetch(&self, operation: &'static str, query: Vec<(String, String)>) -> Result<ChangeBatch> {
        let url = format!("{}/_changes", self.base);
        trace!(%url, operation, "Fetching changes");

        let response = self
            .client
            .get(&url)
            .query(&query)
            .basic_auth(&self.username, Some(&self.password))
            .header(CLIENT_ID_HEADER, &self.client_id)
            .send()
            .await
            .map_err(|e| MirrorError::transport(operation, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MirrorError::transport(
                operation,
                format!("unexpected status {status}"),
            ));
        }

        let body: ChangesResponse = response
            .json()
            .await
            .map_err(|e| MirrorError::transport(operation, format!("malformed body: {e}")))?;

        let batch = body.into_batch();
        debug!(
            operation,
            changes = batch.changes.len(),
            last_seq = batch.last_seq,
            "Fetched changes page"
        );
        Ok(batch)
    }
}

impl RemoteSource for HttpRemote {
    fn changes(&self, since: Seq, limit: usize) -> BoxFuture<'_, ChangeBatch> {
        Box::pin(async move {
            self.fetch(
                "changes",
                vec![
                    ("include_docs".to_string(), "true".to_string()),
                    ("since".to_string(), since.to_string()),
                    ("limit".to_string(), limit.to_string()),
                ],
            )
            .await
        })
    }

    fn follow(&self, since: Seq) -> BoxFuture<'_, ChangeBatch> {
        Box::pin(async move {
            self.fetch(
                "follow",
                vec![
                    ("include_docs".to_string(), "true".to_string()),
                    ("since".to_string(), since.to_string()),
                    ("limit".to_string(), FOLLOW_PAGE.to_string()),
                    ("feed".to_string(), "longpoll".to_string()),
                    ("timeout".to_string(), LONGPOLL_TIMEOUT_MS.to_string()),
                ],
            )
            .await
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Wire format
// ═══════════════════════════════════════════════════════════════════════════

/// Sequence value as it appears on the wire: a bare integer or a
/// `"N-opaquehash"` string. Only the numeric prefix carries ordering.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SeqField {
    Number(u64),
    Text(String),
}

impl SeqField {
    fn to_seq(&self) -> Seq {
        match self {
            SeqField::Number(n) => *n,
            SeqField::Text(s) => parse_seq(s),
        }
    }
}

/// Parse the numeric prefix of a `"N-opaquehash"` sequence string.
/// Unparseable input maps to zero, which at worst restarts the feed.
fn parse_seq(raw: &str) -> Seq {
    raw.split('-')
        .next()
        .and_then(|prefix| prefix.parse().ok())
        .unwrap_or(0)
}

#[derive(Debug, Deserialize)]
struct ChangesResponse {
    results: Vec<ChangeRow>,
    last_seq: SeqField,
}

#[derive(Debug, Deserialize)]
struct ChangeRow {
    seq: SeqField,
    id: String,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    doc: Option<serde_json::Value>,
    #[serde(default)]
    changes: Vec<RevRef>,
}

#[derive(Debug, Deserialize)]
struct RevRef {
    rev: String,
}

impl ChangesResponse {
    fn into_batch(self) -> ChangeBatch {
        let changes = self.results.into_iter().map(ChangeRow::into_change).collect();
        ChangeBatch {
            changes,
            last_seq: self.last_seq.to_seq(),
        }
    }
}

impl ChangeRow {
    fn into_change(self) -> Change {
        let seq = self.seq.to_seq();
        let doc = if self.deleted {
            None
        } else {
            self.doc.map(|raw| {
                let rev = raw
                    .get("_rev")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .or_else(|| self.changes.first().map(|c| c.rev.clone()))
                    .unwrap_or_default();
                let body = strip_meta(raw);
                Document::new(self.id.clone(), rev, body)
            })
        };
        Change {
            seq,
            id: self.id,
            deleted: self.deleted,
            doc,
        }
    }
}

/// Drop the feed's `_id`/`_rev` bookkeeping fields from a document body;
/// they live on the [`Document`] envelope instead.
fn strip_meta(mut raw: serde_json::Value) -> serde_json::Value {
    if let Some(map) = raw.as_object_mut() {
        map.remove("_id");
        map.remove("_rev");
    }
    raw
}
