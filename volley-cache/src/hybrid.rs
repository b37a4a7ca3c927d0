//! Two-tier composition: memory over disk.

use async_trait::async_trait;
use volley_core::{CacheEntry, CacheKey};

use crate::{Cache, CacheError};

/// A cache that layers a fast tier (L1, typically [`MemoryCache`]) over a
/// durable tier (L2, typically [`DiskCache`]).
///
/// Reads check L1 first; an L2 hit is promoted back into L1 with its
/// original creation time and TTL intact, so observed entry age is the same
/// whichever tier served it. Writes go through to both tiers; removals and
/// clears propagate to both. `size` is the sum of tier sizes.
///
/// [`MemoryCache`]: crate::MemoryCache
/// [`DiskCache`]: crate::DiskCache
#[derive(Debug)]
pub struct HybridCache<L1, L2> {
    memory: L1,
    disk: L2,
}

impl<L1, L2> HybridCache<L1, L2>
where
    L1: Cache,
    L2: Cache,
{
    /// Compose two tiers. `memory` is consulted first on reads.
    pub fn new(memory: L1, disk: L2) -> Self {
        HybridCache { memory, disk }
    }

    /// The fast tier.
    pub fn memory(&self) -> &L1 {
        &self.memory
    }

    /// The durable tier.
    pub fn disk(&self) -> &L2 {
        &self.disk
    }
}

#[async_trait]
impl<L1, L2> Cache for HybridCache<L1, L2>
where
    L1: Cache,
    L2: Cache,
{
    async fn get_entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        if let Some(entry) = self.memory.get_entry(key).await {
            return Some(entry);
        }
        let entry = self.disk.get_entry(key).await?;
        // Promote with the original creation time so TTL accounting and
        // observability do not reset on tier movement.
        if let Err(e) = self.memory.put_entry(key.clone(), entry.clone()).await {
            tracing::warn!(%key, error = %e, "promotion into memory tier failed");
        }
        Some(entry)
    }

    async fn put_entry(&self, key: CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        let memory_result = self.memory.put_entry(key.clone(), entry.clone()).await;
        let disk_result = self.disk.put_entry(key, entry).await;
        match (memory_result, disk_result) {
            (Ok(()), _) | (_, Ok(())) => Ok(()),
            (Err(memory_err), Err(disk_err)) => {
                tracing::warn!(error = %memory_err, "memory tier write failed");
                Err(disk_err)
            }
        }
    }

    async fn remove(&self, key: &CacheKey) -> bool {
        let from_memory = self.memory.remove(key).await;
        let from_disk = self.disk.remove(key).await;
        from_memory || from_disk
    }

    async fn clear(&self) {
        self.memory.clear().await;
        self.disk.clear().await;
    }

    async fn contains(&self, key: &CacheKey) -> bool {
        self.memory.contains(key).await || self.disk.contains(key).await
    }

    async fn size(&self) -> u64 {
        self.memory.size().await + self.disk.size().await
    }
}
