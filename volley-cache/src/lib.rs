//! Response caches for the volley request-execution engine.
//!
//! Three implementations share one [`Cache`] contract:
//!
//! - [`MemoryCache`] — byte-bounded, insertion-ordered LRU with TTL-on-read
//!   eviction
//! - [`DiskCache`] — one file per entry plus a JSON manifest, reconciled
//!   against the file set at startup
//! - [`HybridCache`] — memory over disk, read-through with promotion and
//!   write-through to both tiers
//!
//! All tiers serialize their mutations internally, so a shared handle
//! (`Arc<dyn Cache>`) is safe under concurrent use, and every operation is
//! atomic: an entry is either fully installed or absent.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod disk;
mod hybrid;
mod memory;

pub use disk::DiskCache;
pub use hybrid::HybridCache;
pub use memory::MemoryCache;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use volley_core::{CacheEntry, CacheKey};

/// Error type for cache mutations.
///
/// Reads never error: a miss, an expired entry, and an unreadable entry all
/// surface as `None` (the latter is logged and purged).
#[derive(Debug, Error)]
pub enum CacheError {
    /// The entry is larger than the whole cache.
    #[error("entry of {entry} bytes exceeds cache capacity of {capacity} bytes")]
    CapacityExceeded {
        /// Size of the rejected entry.
        entry: u64,
        /// Configured byte cap.
        capacity: u64,
    },

    /// Filesystem failure underneath the disk tier.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The manifest could not be serialized.
    #[error("manifest serialization failed: {0}")]
    Serialization(String),
}

/// Contract shared by every cache tier.
///
/// `get_entry`/`put_entry` are the primitive operations; the bytes-level
/// `get`/`put` are provided on top. Implementations must guarantee that the
/// bytes returned by a read are exactly the bytes of the most recent write
/// for the same key, that nothing is returned past its TTL, and that the
/// configured byte cap holds whenever a call returns.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Read the entry for `key`, dropping it if expired.
    async fn get_entry(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Install `entry` under `key`, replacing any previous entry.
    async fn put_entry(&self, key: CacheKey, entry: CacheEntry) -> Result<(), CacheError>;

    /// Remove the entry for `key`. Returns whether one was present.
    async fn remove(&self, key: &CacheKey) -> bool;

    /// Drop every entry.
    async fn clear(&self);

    /// Whether a non-expired entry exists for `key`, without touching LRU order.
    async fn contains(&self, key: &CacheKey) -> bool;

    /// Total payload bytes currently held.
    async fn size(&self) -> u64;

    /// Read the bytes for `key`.
    async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        self.get_entry(key).await.map(CacheEntry::into_bytes)
    }

    /// Store `bytes` under `key` with an optional TTL.
    async fn put(
        &self,
        key: CacheKey,
        bytes: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.put_entry(key, CacheEntry::new(bytes, ttl)).await
    }
}
