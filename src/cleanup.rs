//! LIFO cleanup ledger.
//!
//! Every acquired resource registers a named release action at the moment of
//! acquisition. Teardown runs the actions in reverse insertion order and
//! never stops at a failing entry, so a partially failed session still
//! releases its container, listener, and scratch state.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::output::Output;

type ReleaseFuture = Pin<Box<dyn Future<Output = std::result::Result<(), Error>> + Send>>;
type ReleaseFn = Box<dyn FnOnce() -> ReleaseFuture + Send>;

/// Ordered registry of release actions, executed LIFO on teardown.
pub struct CleanupLedger {
    entries: Mutex<Vec<(String, ReleaseFn)>>,
    output: Arc<dyn Output>,
}

impl CleanupLedger {
    pub fn new(output: Arc<dyn Output>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            output,
        }
    }

    /// Registers a release action under a name used in failure reports.
    pub fn push<F, Fut>(&self, name: &str, release: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), Error>> + Send + 'static,
    {
        let mut entries = self.entries.lock().expect("cleanup ledger lock poisoned");
        let boxed: ReleaseFn = Box::new(move || -> ReleaseFuture { Box::pin(release()) });
        entries.push((name.to_string(), boxed));
    }

    /// Runs every registered action in reverse insertion order.
    ///
    /// The entry list is drained under the lock before any action runs, so a
    /// second call observes an empty ledger and is a no-op. A failing entry
    /// is reported through the sink and does not prevent the rest.
    pub async fn run(&self) {
        let entries = {
            let mut entries = self.entries.lock().expect("cleanup ledger lock poisoned");
            std::mem::take(&mut *entries)
        };

        for (name, release) in entries.into_iter().rev() {
            tracing::debug!(entry = %name, "running cleanup");
            if let Err(err) = release().await {
                self.output.warning(&format!("cleanup failed for {name}: {err}"));
            }
        }
    }
}
