//! In-memory LRU tier.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use volley_core::{CacheEntry, CacheKey};

use crate::{Cache, CacheError};

/// Byte-bounded in-memory cache with explicit LRU order.
///
/// Entries live in an insertion-ordered structure: the front of the order is
/// the least recently used. A read of a live entry moves it to the back; a
/// read of an expired entry evicts it. A write evicts from the front until
/// the new entry fits, and is rejected outright when it never can.
///
/// Eviction is immediate and deterministic — the byte cap holds the moment
/// any call returns, which is what the engine's cache invariants require.
/// All operations run under one short-lived mutex; none of them suspend.
#[derive(Debug)]
pub struct MemoryCache {
    max_bytes: u64,
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Front is least recently used.
    order: VecDeque<CacheKey>,
    bytes: u64,
}

impl MemoryCache {
    /// A cache holding at most `max_bytes` of payload.
    pub fn new(max_bytes: u64) -> Self {
        MemoryCache {
            max_bytes,
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    /// The configured byte cap.
    pub fn capacity(&self) -> u64 {
        self.max_bytes
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryInner {
    fn detach(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.bytes -= entry.size();
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        Some(entry)
    }

    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
            self.order.push_back(key.clone());
        }
    }

    fn evict_lru(&mut self) {
        if let Some(key) = self.order.pop_front() {
            if let Some(entry) = self.entries.remove(&key) {
                self.bytes -= entry.size();
                tracing::debug!(%key, size = entry.size(), "evicted least recently used entry");
            }
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get_entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut inner = self.lock();
        let entry = inner.entries.get(key)?;
        if entry.is_expired() {
            inner.detach(key);
            return None;
        }
        inner.touch(key);
        inner.entries.get(key).cloned()
    }

    async fn put_entry(&self, key: CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        let size = entry.size();
        let mut inner = self.lock();
        inner.detach(&key);
        while inner.bytes + size > self.max_bytes && !inner.order.is_empty() {
            inner.evict_lru();
        }
        if inner.bytes + size > self.max_bytes {
            return Err(CacheError::CapacityExceeded {
                entry: size,
                capacity: self.max_bytes,
            });
        }
        inner.order.push_back(key.clone());
        inner.entries.insert(key, entry);
        inner.bytes += size;
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> bool {
        self.lock().detach(key).is_some()
    }

    async fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.bytes = 0;
    }

    async fn contains(&self, key: &CacheKey) -> bool {
        let inner = self.lock();
        inner.entries.get(key).is_some_and(|e| !e.is_expired())
    }

    async fn size(&self) -> u64 {
        self.lock().bytes
    }
}
