//! Behavioural tests for the in-memory LRU tier.

use std::time::Duration;

use bytes::Bytes;
use http::Method;
use url::Url;
use volley_cache::{Cache, CacheError, MemoryCache};
use volley_core::{CacheEntry, CacheKey};

fn key(name: &str) -> CacheKey {
    let url = Url::parse(&format!("https://api.example.com/{name}")).unwrap();
    CacheKey::for_request(&Method::GET, &url, None).unwrap()
}

fn payload(len: usize) -> Bytes {
    Bytes::from(vec![0u8; len])
}

#[tokio::test]
async fn get_returns_last_written_bytes() {
    let cache = MemoryCache::new(1024);
    let k = key("users/1");
    cache.put(k.clone(), Bytes::from("first"), None).await.unwrap();
    cache.put(k.clone(), Bytes::from("second"), None).await.unwrap();
    assert_eq!(cache.get(&k).await.unwrap(), Bytes::from("second"));
    // replacing subtracted the old entry's bytes
    assert_eq!(cache.size().await, "second".len() as u64);
}

#[tokio::test]
async fn least_recently_used_entry_is_evicted_first() {
    let cache = MemoryCache::new(1000);
    let (k1, k2, k3) = (key("a"), key("b"), key("c"));
    cache.put(k1.clone(), payload(400), None).await.unwrap();
    cache.put(k2.clone(), payload(400), None).await.unwrap();
    cache.put(k3.clone(), payload(400), None).await.unwrap();

    assert!(cache.get(&k1).await.is_none());
    assert!(cache.get(&k2).await.is_some());
    assert!(cache.get(&k3).await.is_some());
    assert_eq!(cache.size().await, 800);
}

#[tokio::test]
async fn read_touch_protects_an_entry_from_eviction() {
    let cache = MemoryCache::new(1000);
    let (k1, k2, k3) = (key("a"), key("b"), key("c"));
    cache.put(k1.clone(), payload(400), None).await.unwrap();
    cache.put(k2.clone(), payload(400), None).await.unwrap();

    // Touch k1 so k2 becomes the least recently used.
    assert!(cache.get(&k1).await.is_some());
    cache.put(k3.clone(), payload(400), None).await.unwrap();

    assert!(cache.get(&k1).await.is_some());
    assert!(cache.get(&k2).await.is_none());
    assert!(cache.get(&k3).await.is_some());
}

#[tokio::test]
async fn contains_is_not_a_use() {
    let cache = MemoryCache::new(800);
    let (k1, k2, k3) = (key("a"), key("b"), key("c"));
    cache.put(k1.clone(), payload(400), None).await.unwrap();
    cache.put(k2.clone(), payload(400), None).await.unwrap();

    assert!(cache.contains(&k1).await);
    cache.put(k3.clone(), payload(400), None).await.unwrap();

    // k1 was still the LRU despite the contains check.
    assert!(!cache.contains(&k1).await);
    assert!(cache.contains(&k2).await);
}

#[tokio::test]
async fn expired_entries_are_evicted_on_read() {
    let cache = MemoryCache::new(1024);
    let k = key("stale");
    let created = chrono::Utc::now() - chrono::Duration::seconds(120);
    let entry = CacheEntry::from_parts(payload(64), created, Some(Duration::from_secs(60)));
    cache.put_entry(k.clone(), entry).await.unwrap();

    assert_eq!(cache.size().await, 64);
    assert!(cache.get(&k).await.is_none());
    assert_eq!(cache.size().await, 0);
    assert!(!cache.contains(&k).await);
}

#[tokio::test]
async fn unexpired_ttl_entries_are_served() {
    let cache = MemoryCache::new(1024);
    let k = key("fresh");
    cache
        .put(k.clone(), Bytes::from("body"), Some(Duration::from_secs(3600)))
        .await
        .unwrap();
    assert_eq!(cache.get(&k).await.unwrap(), Bytes::from("body"));
}

#[tokio::test]
async fn oversized_write_fails_after_full_drain() {
    let cache = MemoryCache::new(500);
    let (k1, k2) = (key("a"), key("big"));
    cache.put(k1.clone(), payload(400), None).await.unwrap();

    let err = cache.put(k2.clone(), payload(600), None).await.unwrap_err();
    assert!(matches!(err, CacheError::CapacityExceeded { .. }));

    // The failed write is not committed, and the drain emptied the cache.
    assert!(cache.get(&k2).await.is_none());
    assert_eq!(cache.size().await, 0);
}

#[tokio::test]
async fn clear_is_idempotent() {
    let cache = MemoryCache::new(1024);
    cache.put(key("a"), payload(10), None).await.unwrap();
    cache.clear().await;
    cache.clear().await;
    assert_eq!(cache.size().await, 0);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn cap_holds_after_every_call() {
    let cache = MemoryCache::new(1000);
    for i in 0..20 {
        let _ = cache.put(key(&format!("k{i}")), payload(300), None).await;
        assert!(cache.size().await <= 1000);
    }
}
