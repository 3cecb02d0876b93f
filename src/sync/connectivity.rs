use std::time::Duration;
use tokio::sync::watch;

use crate::api::ApiClient;

/// Polls the API host and publishes whether it is reachable.
///
/// Subscribers get a `watch::Receiver<bool>`: `*rx.borrow()` is the current
/// "online" flag and `rx.changed()` fires on every transition.
pub struct ConnectivityMonitor {
    api: ApiClient,
    interval: Duration,
    probe_timeout: Duration,
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(
        api: ApiClient,
        interval: Duration,
        probe_timeout: Duration,
        initially_online: bool,
    ) -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(initially_online);
        (
            Self {
                api,
                interval,
                probe_timeout,
                tx,
            },
            rx,
        )
    }

    /// Another receiver for the same flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Probe once and publish the result. Returns the new state.
    pub async fn check_now(&self) -> bool {
        let online = self.api.is_reachable(self.probe_timeout).await;
        self.publish(online);
        online
    }

    /// Publish a state; subscribers are woken only on a change.
    pub fn publish(&self, online: bool) {
        let changed = self.tx.send_if_modified(|state| {
            if *state == online {
                false
            } else {
                *state = online;
                true
            }
        });
        if changed {
            if online {
                tracing::info!(base_url = %self.api.base_url(), "Connectivity regained");
            } else {
                tracing::warn!(base_url = %self.api.base_url(), "Connectivity lost");
            }
        }
    }

    /// Probe forever at the configured interval.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(100)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.check_now().await;
        }
    }
}
