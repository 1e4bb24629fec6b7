//! In-flight evaluation registry.
//!
//! Correlates asynchronous protocol replies with the logical call that issued
//! them. Settlement consumes the registered sender, so the first resolve or
//! reject for an identifier wins and later frames for it are no-ops, as are
//! settlements for identifiers that were never registered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

/// Outcome of one evaluation: success content from the output channel, or a
/// failure message from the error channel.
pub(crate) type Settlement = std::result::Result<String, String>;

#[derive(Default)]
pub(crate) struct PendingCalls {
    calls: Mutex<HashMap<u64, oneshot::Sender<Settlement>>>,
}

impl PendingCalls {
    pub(crate) fn register(&self, id: u64) -> oneshot::Receiver<Settlement> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        rx
    }

    pub(crate) fn resolve(&self, id: u64, content: String) {
        self.settle(id, Ok(content));
    }

    pub(crate) fn reject(&self, id: u64, message: String) {
        self.settle(id, Err(message));
    }

    pub(crate) fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Drops every registered sender, failing any caller still awaiting.
    /// Used at disposal, when no reply can ever arrive.
    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    fn settle(&self, id: u64, settlement: Settlement) {
        if let Some(tx) = self.lock().remove(&id) {
            // The receiver may already be gone if the caller gave up waiting.
            let _ = tx.send(settlement);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Settlement>>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes the registry entry when dropped, so a cancelled or failed `eval`
/// cannot leave its identifier behind to accumulate.
pub(crate) struct PendingGuard {
    calls: Arc<PendingCalls>,
    id: u64,
}

impl PendingGuard {
    pub(crate) fn new(calls: Arc<PendingCalls>, id: u64) -> Self {
        Self { calls, id }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.calls.remove(self.id);
    }
}
