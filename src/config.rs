//! Configuration for the mirror store.
//!
//! All settings carry defaults except the remote endpoint and credentials,
//! which are only required when a real HTTP remote is used. Every field can be
//! overridden from the environment:
//!
//! ```text
//! MIRROR_STORE_NAME              store / snapshot base name
//! MIRROR_STORE_ROOT              directory holding snapshot files
//! MIRROR_REMOTE_URL              remote endpoint base URL
//! MIRROR_REMOTE_USERNAME         basic-auth username
//! MIRROR_REMOTE_PASSWORD         basic-auth password
//! MIRROR_CLIENT_ID               client identifier sent with every request
//! MIRROR_CHECKPOINT_INTERVAL_MS  checkpoint interval in milliseconds
//! MIRROR_CHECKPOINT_INTERVAL     same, as a humantime string ("5m", "90s")
//! MIRROR_BATCH_SIZE              replication page size
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use mirror_store::config::MirrorConfig;
//!
//! let config = MirrorConfig {
//!     store_name: "lifts".into(),
//!     remote_url: "https://couch.example.com/lifts".into(),
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one mirror instance.
///
/// Constructed programmatically, deserialized from JSON, or read from the
/// environment via [`MirrorConfig::from_env()`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Store name; snapshot files are `<store_root>/<store_name>.db`.
    #[serde(default = "default_store_name")]
    pub store_name: String,

    /// Directory holding snapshot files.
    #[serde(default = "default_store_root")]
    pub store_root: String,

    /// Remote endpoint base URL. Required for real remote sync.
    #[serde(default)]
    pub remote_url: String,

    /// Basic-auth username. Required for real remote sync.
    #[serde(default)]
    pub username: String,

    /// Basic-auth password. Required for real remote sync.
    #[serde(default)]
    pub password: String,

    /// Client identifier tagged onto every remote request.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// How often the checkpoint loop snapshots the store (milliseconds).
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,

    /// Maximum changes pulled per replication page.
    ///
    /// Bounds memory during the initial batch phase on large datasets.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_store_name() -> String {
    "mirror".to_string()
}

fn default_store_root() -> String {
    ".".to_string()
}

fn default_client_id() -> String {
    concat!("mirror-store/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_checkpoint_interval_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_batch_size() -> usize {
    100
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            store_name: default_store_name(),
            store_root: default_store_root(),
            remote_url: String::new(),
            username: String::new(),
            password: String::new(),
            client_id: default_client_id(),
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
            batch_size: default_batch_size(),
        }
    }
}

impl MirrorConfig {
    /// Read configuration from the environment, starting from defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from a key lookup (the environment in production,
    /// a map in tests). Unparseable numeric values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MIRROR_STORE_NAME") {
            self.store_name = v;
        }
        if let Some(v) = lookup("MIRROR_STORE_ROOT") {
            self.store_root = v;
        }
        if let Some(v) = lookup("MIRROR_REMOTE_URL") {
            self.remote_url = v;
        }
        if let Some(v) = lookup("MIRROR_REMOTE_USERNAME") {
            self.username = v;
        }
        if let Some(v) = lookup("MIRROR_REMOTE_PASSWORD") {
            self.password = v;
        }
        if let Some(v) = lookup("MIRROR_CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = lookup("MIRROR_CHECKPOINT_INTERVAL_MS") {
            if let Ok(ms) = v.parse() {
                self.checkpoint_interval_ms = ms;
            }
        }
        // Humantime form wins over the millisecond form when both are set.
        if let Some(v) = lookup("MIRROR_CHECKPOINT_INTERVAL") {
            if let Ok(d) = humantime::parse_duration(&v) {
                self.checkpoint_interval_ms = d.as_millis() as u64;
            }
        }
        if let Some(v) = lookup("MIRROR_BATCH_SIZE") {
            if let Ok(n) = v.parse() {
                self.batch_size = n;
            }
        }
    }

    /// Checkpoint interval as a Duration.
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }

    /// Validate settings required for a real HTTP remote.
    ///
    /// The in-memory remote needs none of these, so validation is a separate
    /// step rather than part of construction.
    pub fn validate_remote(&self) -> crate::error::Result<()> {
        if self.remote_url.is_empty() {
            return Err(crate::error::MirrorError::Config(
                "remote_url is required".to_string(),
            ));
        }
        if self.username.is_empty() || self.password.is_empty() {
            return Err(crate::error::MirrorError::Config(
                "username and password are required".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(crate::error::MirrorError::Config(
                "batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a config for testing: short checkpoint interval, small pages,
    /// snapshots under the given directory.
    pub fn for_testing(store_root: &str) -> Self {
        Self {
            store_name: "test".to_string(),
            store_root: store_root.to_string(),
            checkpoint_interval_ms: 50,
            batch_size: 10,
            ..Default::default()
        }
    }
}
