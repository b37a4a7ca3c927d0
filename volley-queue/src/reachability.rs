//! Connectivity status fan-out.
//!
//! The OS-level notification source is out of scope; whatever platform
//! integration exists feeds [`ReachabilityMonitor::set_status`], and the
//! monitor fans transitions out to callback listeners and `watch`
//! subscribers (the sync manager uses the latter).

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use uuid::Uuid;

/// Current connectivity, as last reported by the platform source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReachabilityStatus {
    /// No report received yet.
    #[default]
    Unknown,
    /// The network is unreachable.
    NotReachable,
    /// Reachable over Wi-Fi.
    Wifi,
    /// Reachable over a cellular link.
    Cellular,
}

impl ReachabilityStatus {
    /// Whether requests can be attempted at all.
    pub fn is_reachable(&self) -> bool {
        matches!(self, ReachabilityStatus::Wifi | ReachabilityStatus::Cellular)
    }
}

/// Opaque handle identifying one registered listener.
pub type SubscriptionId = Uuid;

type Listener = Arc<dyn Fn(ReachabilityStatus) + Send + Sync>;

/// Multi-listener connectivity observer.
#[derive(Clone)]
pub struct ReachabilityMonitor {
    sender: Arc<watch::Sender<ReachabilityStatus>>,
    listeners: Arc<DashMap<SubscriptionId, Listener>>,
}

impl ReachabilityMonitor {
    /// A monitor starting in [`ReachabilityStatus::Unknown`].
    pub fn new() -> Self {
        let (sender, _) = watch::channel(ReachabilityStatus::Unknown);
        ReachabilityMonitor {
            sender: Arc::new(sender),
            listeners: Arc::new(DashMap::new()),
        }
    }

    /// The most recently reported status.
    pub fn status(&self) -> ReachabilityStatus {
        *self.sender.borrow()
    }

    /// Report a status change from the platform source.
    ///
    /// Listeners and watchers are only notified on actual transitions.
    pub fn set_status(&self, status: ReachabilityStatus) {
        let previous = *self.sender.borrow();
        if previous == status {
            return;
        }
        tracing::debug!(?previous, current = ?status, "reachability changed");
        let _ = self.sender.send(status);
        // Collect first so callbacks never run under the map's shard locks.
        let listeners: Vec<Listener> = self
            .listeners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for listener in listeners {
            listener(status);
        }
    }

    /// Register a callback invoked on every transition.
    pub fn subscribe(
        &self,
        listener: impl Fn(ReachabilityStatus) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.listeners.insert(id, Arc::new(listener));
        id
    }

    /// Remove a callback. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// A `watch` subscription over status values.
    pub fn watch(&self) -> watch::Receiver<ReachabilityStatus> {
        self.sender.subscribe()
    }
}

impl Default for ReachabilityMonitor {
    fn default() -> Self {
        ReachabilityMonitor::new()
    }
}

impl std::fmt::Debug for ReachabilityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReachabilityMonitor")
            .field("status", &self.status())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn reachable_statuses() {
        assert!(!ReachabilityStatus::Unknown.is_reachable());
        assert!(!ReachabilityStatus::NotReachable.is_reachable());
        assert!(ReachabilityStatus::Wifi.is_reachable());
        assert!(ReachabilityStatus::Cellular.is_reachable());
    }

    #[test]
    fn listeners_fire_on_transitions_only() {
        let monitor = ReachabilityMonitor::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let id = monitor.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        monitor.set_status(ReachabilityStatus::Wifi);
        monitor.set_status(ReachabilityStatus::Wifi);
        monitor.set_status(ReachabilityStatus::NotReachable);
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        assert!(monitor.unsubscribe(id));
        monitor.set_status(ReachabilityStatus::Cellular);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(!monitor.unsubscribe(id));
    }

    #[test]
    fn status_reflects_last_report() {
        let monitor = ReachabilityMonitor::new();
        assert_eq!(monitor.status(), ReachabilityStatus::Unknown);
        monitor.set_status(ReachabilityStatus::Cellular);
        assert_eq!(monitor.status(), ReachabilityStatus::Cellular);
        assert!(monitor.status().is_reachable());
    }
}
