use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Name under which story drains are registered.
pub const SYNC_TAG: &str = "sync-stories";

/// A request to run a drain, delivered to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub tag: &'static str,
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Sync worker is not running")]
    Closed,
}

/// Handle for scheduling a deferred drain.
///
/// Registration never waits. It only ever speeds things up: the coordinator
/// also drains on startup and whenever connectivity comes back, so a lost or
/// refused registration costs latency, not data.
#[derive(Debug, Clone)]
pub struct SyncTrigger {
    tx: mpsc::Sender<SyncRequest>,
}

/// Create a trigger and the receiver the coordinator listens on.
pub fn trigger_channel(capacity: usize) -> (SyncTrigger, mpsc::Receiver<SyncRequest>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (SyncTrigger { tx }, rx)
}

impl SyncTrigger {
    /// Ask the coordinator to drain. A full channel already has a drain
    /// pending, so it counts as success.
    pub fn register(&self, tag: &'static str) -> Result<(), TriggerError> {
        match self.tx.try_send(SyncRequest { tag }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::trace!(tag = tag, "Sync already pending");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(TriggerError::Closed),
        }
    }
}
