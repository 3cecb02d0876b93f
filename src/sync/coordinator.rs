use secrecy::SecretString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

use super::trigger::SyncRequest;
use crate::api::ApiClient;
use crate::storage::{Database, QueuedSubmission};

/// Outcome of one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Stories the server acknowledged and that were removed from the queue
    pub delivered: usize,
    /// Stories left queued after a network failure or server rejection
    pub failed: usize,
    /// Stories left queued because the server refused their captured token (HTTP 401)
    pub unauthorized: usize,
    /// The cycle stopped early because the queue could not be read or updated
    pub aborted: bool,
    /// Another drain was already running; it will re-scan the queue instead
    pub skipped: bool,
}

impl DrainReport {
    /// Stories known to still be queued after this cycle.
    pub fn remaining(&self) -> usize {
        self.failed + self.unauthorized
    }

    fn absorb(&mut self, pass: DrainReport) {
        self.delivered += pass.delivered;
        self.failed = pass.failed;
        self.unauthorized = pass.unauthorized;
        self.aborted = pass.aborted;
    }
}

/// Drains the sync queue.
///
/// One drain runs at a time per coordinator. A drain requested while another
/// is in flight returns immediately with `skipped` set and makes the running
/// drain scan the queue once more when it finishes, so no item is submitted
/// twice concurrently from this process. Other processes sharing the database
/// may drain in parallel; removal of an id they already removed is a no-op.
pub struct SyncCoordinator {
    db: Database,
    api: ApiClient,
    drain_lock: Mutex<()>,
    rescan: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(db: Database, api: ApiClient) -> Self {
        Self {
            db,
            api,
            drain_lock: Mutex::new(()),
            rescan: AtomicBool::new(false),
        }
    }

    /// Attempt delivery of every queued story, in enqueue order.
    ///
    /// Successful items are removed; failures stay queued for the next
    /// trigger with no backoff or retry cap. Storage failures abort the cycle
    /// and are only logged.
    pub async fn drain(&self) -> DrainReport {
        // Raised before trying the lock, so a holder that is just finishing
        // sees the request either before or after it lets go.
        self.rescan.store(true, Ordering::SeqCst);
        let Ok(mut guard) = self.drain_lock.try_lock() else {
            tracing::debug!("Drain already in progress, re-scan requested");
            return DrainReport {
                skipped: true,
                ..DrainReport::default()
            };
        };

        let mut report = DrainReport::default();
        loop {
            self.rescan.store(false, Ordering::SeqCst);
            report.absorb(self.drain_pass().await);

            if report.aborted {
                break;
            }
            if self.rescan.load(Ordering::SeqCst) {
                tracing::debug!("Re-scanning sync queue");
                continue;
            }

            drop(guard);
            // A drain refused between the check above and the release left
            // only the flag behind.
            if !self.rescan.load(Ordering::SeqCst) {
                break;
            }
            match self.drain_lock.try_lock() {
                Ok(relocked) => {
                    tracing::debug!("Re-scanning sync queue");
                    guard = relocked;
                }
                // The new holder clears the flag and scans the queue itself.
                Err(_) => break,
            }
        }

        if report.delivered > 0 || report.remaining() > 0 || report.aborted {
            tracing::info!(
                delivered = report.delivered,
                failed = report.failed,
                unauthorized = report.unauthorized,
                aborted = report.aborted,
                "Drain cycle finished"
            );
        }
        report
    }

    async fn drain_pass(&self) -> DrainReport {
        let mut report = DrainReport::default();

        let items = match self.db.get_all_queued().await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read sync queue, aborting drain");
                report.aborted = true;
                return report;
            }
        };

        for item in &items {
            match self.deliver(item).await {
                Ok(()) => {
                    if let Err(e) = self.db.remove_queued(item.id()).await {
                        // Delivered but still queued: the next drain sends it again.
                        tracing::warn!(id = %item.id(), error = %e, "Could not remove delivered story, aborting drain");
                        report.delivered += 1;
                        report.aborted = true;
                        return report;
                    }
                    report.delivered += 1;
                }
                Err(e) if e.is_unauthorized() => {
                    tracing::warn!(
                        id = %item.id(),
                        "Queued story rejected: token captured at enqueue time is no longer valid"
                    );
                    report.unauthorized += 1;
                }
                Err(e) => {
                    tracing::debug!(id = %item.id(), error = %e, "Queued story not delivered, keeping it");
                    report.failed += 1;
                }
            }
        }

        report
    }

    async fn deliver(&self, item: &QueuedSubmission) -> Result<(), crate::api::ApiError> {
        let token = item.token().map(|t| SecretString::from(t.to_string()));
        self.api.submit_story(item.into(), token.as_ref()).await?;
        tracing::info!(id = %item.id(), "Delivered queued story");
        Ok(())
    }

    /// Drive drains until the connectivity sender goes away.
    ///
    /// - drains once immediately when already online;
    /// - drains on every offline → online transition;
    /// - drains on each deferred-sync request received while online.
    ///
    /// `requests` may be `None`: the other two paths are enough on their own.
    pub async fn run(
        self: Arc<Self>,
        mut online: watch::Receiver<bool>,
        mut requests: Option<mpsc::Receiver<SyncRequest>>,
    ) {
        let mut was_online = *online.borrow_and_update();
        if was_online {
            tracing::debug!("Online at startup, draining sync queue");
            self.drain().await;
        }

        loop {
            tokio::select! {
                changed = online.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Connectivity monitor stopped, sync coordinator exiting");
                        break;
                    }
                    let now_online = *online.borrow_and_update();
                    if now_online && !was_online {
                        self.drain().await;
                    }
                    was_online = now_online;
                }
                request = next_request(&mut requests) => match request {
                    Some(request) => {
                        if *online.borrow() {
                            tracing::debug!(tag = request.tag, "Deferred sync fired");
                            self.drain().await;
                        } else {
                            tracing::debug!(tag = request.tag, "Deferred sync while offline, waiting for connectivity");
                        }
                    }
                    None => requests = None,
                },
            }
        }
    }
}

async fn next_request(requests: &mut Option<mpsc::Receiver<SyncRequest>>) -> Option<SyncRequest> {
    match requests {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
