//! Offline request queue, reachability fan-out and background sync.
//!
//! When the network is unavailable, mutating requests land in the
//! [`OfflineQueue`] — a durable, priority-ordered store. The
//! [`ReachabilityMonitor`] fans connectivity transitions out to listeners,
//! and the [`SyncManager`] drains the queue through a [`Replayer`] (the
//! request engine) whenever connectivity returns.
//!
//! The queue crate never depends on the engine: the engine implements
//! [`Replayer`] and hands itself in, keeping the dependency arrow pointed at
//! `volley-core` only.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod queue;
mod reachability;
mod sync;

pub use queue::{OfflineQueue, QueueConfig, QueueError, QueueEvent, QueuedRequest};
pub use reachability::{ReachabilityMonitor, ReachabilityStatus, SubscriptionId};
pub use sync::{SyncManager, SyncStatus};

use async_trait::async_trait;
use volley_core::Error;

/// The seam through which queued requests are re-submitted.
///
/// Implementations replay the entry as a live call and must run it with
/// no-requeue semantics: a failed replay is reported back to the queue, never
/// enqueued again from inside the call path.
#[async_trait]
pub trait Replayer: Send + Sync {
    /// Re-submit one queued request.
    async fn replay(&self, entry: &QueuedRequest) -> Result<(), Error>;
}
