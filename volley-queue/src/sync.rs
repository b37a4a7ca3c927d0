//! Connectivity-driven queue drain.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::task::JoinHandle;

use crate::queue::{OfflineQueue, QueueEvent};
use crate::reachability::ReachabilityMonitor;
use crate::Replayer;

/// Whether a drain is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// No drain in progress.
    Idle,
    /// A drain is in progress.
    Syncing,
}

struct SyncInner {
    queue: Arc<OfflineQueue>,
    reachability: ReachabilityMonitor,
    replayer: Arc<dyn Replayer>,
    syncing: AtomicBool,
    auto_sync: bool,
}

/// Drives the offline queue when connectivity returns.
///
/// One drain runs at a time: re-entrant triggers (multiple rapid
/// transitions, a manual `sync_now` during an automatic drain) coalesce into
/// the running one. Replays go through the configured [`Replayer`], which
/// runs them with no-requeue semantics so a failure cannot cycle back into
/// the queue through the call path; it either stays in the queue for the
/// next drain or is dropped once its retry budget is spent.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<SyncInner>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SyncManager {
    /// A manager with automatic drains on reachability transitions.
    pub fn new(
        queue: Arc<OfflineQueue>,
        reachability: ReachabilityMonitor,
        replayer: Arc<dyn Replayer>,
    ) -> Self {
        Self::with_auto_sync(queue, reachability, replayer, true)
    }

    /// A manager with automatic drains switched on or off.
    pub fn with_auto_sync(
        queue: Arc<OfflineQueue>,
        reachability: ReachabilityMonitor,
        replayer: Arc<dyn Replayer>,
        auto_sync: bool,
    ) -> Self {
        SyncManager {
            inner: Arc::new(SyncInner {
                queue,
                reachability,
                replayer,
                syncing: AtomicBool::new(false),
                auto_sync,
            }),
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Start watching reachability transitions.
    ///
    /// A transition from non-reachable to reachable triggers a drain when
    /// auto-sync is enabled. Calling `start` again replaces the watcher.
    pub fn start(&self) {
        let inner = self.inner.clone();
        let mut rx = inner.reachability.watch();
        // Snapshot the status now: a transition landing between start() and
        // the task's first poll must still be observed as a transition.
        let mut last = *rx.borrow();
        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let current = *rx.borrow_and_update();
                if inner.auto_sync && !last.is_reachable() && current.is_reachable() {
                    tracing::info!(status = ?current, "connectivity restored, draining queue");
                    Self::drain(&inner).await;
                }
                last = current;
            }
        });
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Stop the reachability watcher. In-flight drains finish on their own.
    pub fn stop(&self) {
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    /// Drain the queue now. Returns the number of replayed entries;
    /// `0` when a drain was already running.
    pub async fn sync_now(&self) -> usize {
        Self::drain(&self.inner).await
    }

    /// Whether a drain is currently running.
    pub fn status(&self) -> SyncStatus {
        if self.inner.syncing.load(Ordering::SeqCst) {
            SyncStatus::Syncing
        } else {
            SyncStatus::Idle
        }
    }

    async fn drain(inner: &SyncInner) -> usize {
        if inner
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("sync already running, trigger coalesced");
            return 0;
        }
        let replayed = inner
            .queue
            .process(inner.replayer.as_ref(), |event| match event {
                QueueEvent::Replayed { id } => {
                    tracing::debug!(%id, "queued request replayed");
                }
                QueueEvent::Requeued { id, retry_count } => {
                    tracing::debug!(%id, retry_count, "queued request requeued");
                }
                QueueEvent::Dropped { id, error } => {
                    tracing::warn!(%id, %error, "queued request dropped");
                }
            })
            .await;
        inner.syncing.store(false, Ordering::SeqCst);
        replayed
    }
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("status", &self.status())
            .field("auto_sync", &self.inner.auto_sync)
            .finish()
    }
}
