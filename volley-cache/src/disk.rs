//! Disk-backed tier: one file per entry plus a JSON manifest.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;
use volley_core::{CacheEntry, CacheKey};

use crate::{Cache, CacheError};

const MANIFEST: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestRecord {
    filename: String,
    size: u64,
    created_at_epoch_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl_seconds: Option<u64>,
}

impl ManifestRecord {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_seconds {
            Some(ttl) => now.timestamp() - self.created_at_epoch_seconds > ttl as i64,
            None => false,
        }
    }

    fn created_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.created_at_epoch_seconds, 0).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

#[derive(Debug, Default)]
struct DiskState {
    records: HashMap<String, ManifestRecord>,
    bytes: u64,
}

/// Persistent cache tier.
///
/// Every entry is a separate file under the cache directory, named by a
/// fresh opaque id; `manifest.json` maps key strings to file metadata. The
/// manifest is only written after entry files, and always through a
/// tmp-file-plus-rename, so a crash can at worst leave orphan files — which
/// startup reconciliation deletes, trusting the file set over the manifest.
///
/// Eviction is oldest-created-first once the byte cap is exceeded.
#[derive(Debug)]
pub struct DiskCache {
    root: PathBuf,
    max_bytes: u64,
    state: Mutex<DiskState>,
}

impl DiskCache {
    /// Open (or create) a disk cache rooted at `root`.
    ///
    /// Loads the manifest, drops expired entries, purges manifest records
    /// whose file is missing, and deletes files the manifest does not know. A
    /// corrupt manifest is replaced by an empty one.
    pub async fn open(root: impl Into<PathBuf>, max_bytes: u64) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let mut records: HashMap<String, ManifestRecord> =
            match fs::read(root.join(MANIFEST)).await {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(records) => records,
                    Err(e) => {
                        tracing::warn!(error = %e, "corrupt cache manifest, starting empty");
                        HashMap::new()
                    }
                },
                Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
                Err(e) => return Err(e.into()),
            };

        let mut on_disk = HashSet::new();
        let mut dir = fs::read_dir(&root).await?;
        while let Some(dirent) = dir.next_entry().await? {
            let name = dirent.file_name().to_string_lossy().into_owned();
            if name != MANIFEST && !name.ends_with(".tmp") {
                on_disk.insert(name);
            }
        }

        let now = Utc::now();
        let mut keep = HashMap::new();
        for (key, record) in records.drain() {
            if !on_disk.remove(&record.filename) {
                tracing::warn!(%key, file = %record.filename, "manifest entry without file, purged");
                continue;
            }
            if record.is_expired_at(now) {
                let _ = fs::remove_file(root.join(&record.filename)).await;
                continue;
            }
            keep.insert(key, record);
        }
        for orphan in on_disk {
            tracing::warn!(file = %orphan, "orphaned cache file deleted");
            let _ = fs::remove_file(root.join(&orphan)).await;
        }

        let bytes = keep.values().map(|r| r.size).sum();
        let cache = DiskCache {
            root,
            max_bytes,
            state: Mutex::new(DiskState {
                records: keep,
                bytes,
            }),
        };
        {
            let state = cache.state.lock().await;
            cache.persist(&state).await?;
        }
        Ok(cache)
    }

    /// The configured byte cap.
    pub fn capacity(&self) -> u64 {
        self.max_bytes
    }

    /// The cache directory.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    async fn persist(&self, state: &DiskState) -> Result<(), CacheError> {
        let json = serde_json::to_vec_pretty(&state.records)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        let tmp = self.root.join("manifest.json.tmp");
        fs::write(&tmp, &json).await?;
        fs::rename(&tmp, self.root.join(MANIFEST)).await?;
        Ok(())
    }

    async fn drop_record(&self, state: &mut DiskState, key: &str) {
        if let Some(record) = state.records.remove(key) {
            state.bytes -= record.size;
            let _ = fs::remove_file(self.root.join(&record.filename)).await;
            if let Err(e) = self.persist(state).await {
                tracing::warn!(error = %e, "manifest write after purge failed");
            }
        }
    }
}

#[async_trait]
impl Cache for DiskCache {
    async fn get_entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut state = self.state.lock().await;
        let k = key.to_string();
        let record = state.records.get(&k)?.clone();
        if record.is_expired_at(Utc::now()) {
            self.drop_record(&mut state, &k).await;
            return None;
        }
        match fs::read(self.root.join(&record.filename)).await {
            Ok(bytes) => Some(CacheEntry::from_parts(
                Bytes::from(bytes),
                record.created_at(),
                record.ttl_seconds.map(Duration::from_secs),
            )),
            Err(e) => {
                tracing::warn!(%key, error = %e, "cache file unreadable, purged");
                self.drop_record(&mut state, &k).await;
                None
            }
        }
    }

    async fn put_entry(&self, key: CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        let size = entry.size();
        if size > self.max_bytes {
            return Err(CacheError::CapacityExceeded {
                entry: size,
                capacity: self.max_bytes,
            });
        }

        let mut state = self.state.lock().await;
        let k = key.to_string();
        let filename = format!("{}.bin", Uuid::new_v4().simple());
        fs::write(self.root.join(&filename), entry.bytes()).await?;

        if let Some(old) = state.records.remove(&k) {
            state.bytes -= old.size;
            let _ = fs::remove_file(self.root.join(&old.filename)).await;
        }

        while state.bytes + size > self.max_bytes {
            let victim = state
                .records
                .iter()
                .min_by_key(|(_, r)| r.created_at_epoch_seconds)
                .map(|(k, _)| k.clone());
            match victim {
                Some(victim) => {
                    if let Some(record) = state.records.remove(&victim) {
                        state.bytes -= record.size;
                        let _ = fs::remove_file(self.root.join(&record.filename)).await;
                        tracing::debug!(key = %victim, "evicted oldest entry");
                    }
                }
                None => break,
            }
        }

        state.records.insert(
            k,
            ManifestRecord {
                filename,
                size,
                created_at_epoch_seconds: entry.created_at().timestamp(),
                ttl_seconds: entry.ttl().map(|t| t.as_secs()),
            },
        );
        state.bytes += size;
        self.persist(&state).await
    }

    async fn remove(&self, key: &CacheKey) -> bool {
        let mut state = self.state.lock().await;
        let k = key.to_string();
        let present = state.records.contains_key(&k);
        self.drop_record(&mut state, &k).await;
        present
    }

    async fn clear(&self) {
        let mut state = self.state.lock().await;
        for record in state.records.values() {
            let _ = fs::remove_file(self.root.join(&record.filename)).await;
        }
        state.records.clear();
        state.bytes = 0;
        if let Err(e) = self.persist(&state).await {
            tracing::warn!(error = %e, "manifest write after clear failed");
        }
    }

    async fn contains(&self, key: &CacheKey) -> bool {
        let state = self.state.lock().await;
        state
            .records
            .get(&key.to_string())
            .is_some_and(|r| !r.is_expired_at(Utc::now()))
    }

    async fn size(&self) -> u64 {
        self.state.lock().await.bytes
    }
}
