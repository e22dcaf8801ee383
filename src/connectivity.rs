//! Network reachability monitoring.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Observes network reachability and notifies subscribers of transitions.
///
/// The contract the gateway relies on: `subscribe()` yields a channel that
/// observes every offline→online transition, and each such transition
/// triggers exactly one queue drain.
pub trait ConnectivityMonitor: Send + Sync {
    /// Current reachability state.
    fn is_online(&self) -> bool;

    /// Subscribe to state transitions.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Manually driven monitor.
///
/// Doubles as the test fake and as the binding point for a platform
/// reachability signal: the embedding application forwards its own
/// online/offline events into [`ManualConnectivity::set_online`].
pub struct ManualConnectivity {
    tx: watch::Sender<bool>,
}

impl ManualConnectivity {
    /// Create a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    /// Report a reachability change. Repeated reports of the same state
    /// are ignored, so subscribers only see transitions.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|state| {
            if *state != online {
                info!(online, "connectivity changed");
                *state = online;
                true
            } else {
                false
            }
        });
    }
}

impl ConnectivityMonitor for ManualConnectivity {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Monitor that infers reachability by probing a URL on an interval.
///
/// Production adapter for platforms without a native reachability signal.
/// Any HTTP response counts as reachable; only transport failures flip the
/// state to offline.
pub struct ProbeConnectivity {
    state: ManualConnectivity,
}

impl ProbeConnectivity {
    /// Spawn a probe loop against `probe_url`. The loop stops when the
    /// returned monitor is dropped.
    pub fn spawn(probe_url: url::Url, interval: Duration) -> Arc<Self> {
        let monitor = Arc::new(Self {
            state: ManualConnectivity::new(true),
        });

        let client = reqwest::Client::builder()
            .timeout(interval.min(Duration::from_secs(5)))
            .build()
            .unwrap_or_default();
        let weak: Weak<Self> = Arc::downgrade(&monitor);

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(monitor) = weak.upgrade() else {
                    break;
                };
                let reachable = client.head(probe_url.clone()).send().await.is_ok();
                debug!(reachable, url = %probe_url, "connectivity probe");
                monitor.state.set_online(reachable);
            }
        });

        monitor
    }
}

impl ConnectivityMonitor for ProbeConnectivity {
    fn is_online(&self) -> bool {
        self.state.is_online()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_transitions_reach_subscribers() {
        let monitor = ManualConnectivity::new(true);
        let mut rx = monitor.subscribe();

        monitor.set_online(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow());
        assert!(!monitor.is_online());

        monitor.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_duplicate_state_reports_are_suppressed() {
        let monitor = ManualConnectivity::new(true);
        let mut rx = monitor.subscribe();

        monitor.set_online(true);
        monitor.set_online(true);
        assert!(!rx.has_changed().unwrap());
    }
}
