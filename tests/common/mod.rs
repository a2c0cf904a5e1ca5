//! Shared test infrastructure for integration tests.

pub mod mock_remote;

use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a tracing subscriber once per test binary so failures come with
/// trace output. Filtered by `RUST_LOG`, e.g. `RUST_LOG=mirror_store=debug`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
