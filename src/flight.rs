//! Shared in-flight operation (single-flight).
//!
//! Coalesces concurrent duplicate operations onto one shared future: the
//! first caller starts the work, every concurrent caller awaits the same
//! outcome, and once the work settles the slot clears so a *later* call
//! starts fresh. Used to guarantee at most one snapshot write in flight.
//!
//! Failure semantics: all waiters of one flight observe the same (cloned)
//! result, success or failure. A failed flight does not poison the slot;
//! the next call simply starts a new attempt.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::Mutex;

/// Coalescer for one logical operation at a time.
pub struct Flight<T: Clone> {
    slot: Mutex<Option<Shared<BoxFuture<'static, T>>>>,
}

impl<T: Clone> Default for Flight<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<T: Clone> Flight<T> {
    /// Create an empty flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether an operation is currently in flight.
    pub fn is_in_flight(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }
}

impl<T: Clone + Send + Sync + 'static> Flight<T> {
    /// Join the in-flight operation, or start one via `make` if none exists.
    ///
    /// `make` is only invoked when this call starts a new flight. The future
    /// it returns must be `'static`: capture owned handles, not references.
    pub async fn run<F, Fut>(&self, make: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let shared = {
            let mut slot = self.slot.lock().unwrap();
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let shared = make().boxed().shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };

        let result = shared.clone().await;

        // Clear the slot, but only if it still holds *our* flight; a newer
        // flight started by a later caller must not be evicted.
        let mut slot = self.slot.lock().unwrap();
        if slot.as_ref().map(|f| f.ptr_eq(&shared)).unwrap_or(false) {
            *slot = None;
        }

        result
    }
}
