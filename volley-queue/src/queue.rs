//! Durable priority queue for requests issued while offline.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;
use volley_core::WireRequest;

use crate::Replayer;

/// Error type for queue mutations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue is at its configured capacity.
    #[error("offline queue is full ({capacity} entries)")]
    Full {
        /// Configured maximum number of entries.
        capacity: usize,
    },

    /// Filesystem failure underneath persistence.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The queue could not be serialized.
    #[error("queue serialization failed: {0}")]
    Serialization(String),
}

/// One deferred request, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedRequest {
    /// Stable identity across persists and drains.
    pub id: Uuid,
    /// Absolute URL to replay against.
    pub url: String,
    /// Request method name.
    pub method: String,
    /// Header pairs captured at enqueue time.
    pub headers: Vec<(String, String)>,
    /// Encoded body bytes, when the request had one.
    pub body: Option<Bytes>,
    /// Drain priority; higher drains first.
    pub priority: i32,
    /// When the entry was enqueued.
    pub created_at: DateTime<Utc>,
    /// Hard deadline after which the entry must never be replayed.
    pub expires_at: Option<DateTime<Utc>>,
    /// Failed replay attempts so far.
    pub retry_count: u32,
    /// Message of the most recent replay failure.
    pub last_error: Option<String>,
}

impl QueuedRequest {
    /// Capture a wire request for later replay.
    pub fn from_wire(wire: &WireRequest, priority: i32) -> Self {
        let headers = wire
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        QueuedRequest {
            id: Uuid::new_v4(),
            url: wire.url.to_string(),
            method: wire.method.as_str().to_owned(),
            headers,
            body: wire.body.clone(),
            priority,
            created_at: Utc::now(),
            expires_at: None,
            retry_count: 0,
            last_error: None,
        }
    }

    /// Give the entry a hard expiry `ttl` from now.
    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_at = Utc::now().checked_add_signed(
            chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        );
        self
    }

    /// Whether the entry is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| now > deadline)
    }

    /// Whether the entry is past its expiry right now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Outcome of one entry during a drain.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// The entry replayed successfully and was consumed.
    Replayed {
        /// Entry id.
        id: Uuid,
    },
    /// The replay failed; the entry went back into the queue.
    Requeued {
        /// Entry id.
        id: Uuid,
        /// Failed attempts so far.
        retry_count: u32,
    },
    /// The replay failed and the retry budget or expiry dropped the entry.
    Dropped {
        /// Entry id.
        id: Uuid,
        /// The final failure message.
        error: String,
    },
}

/// Capacity and retry limits for the queue.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Maximum number of stored entries.
    pub max_size: usize,
    /// Replay attempts per entry before it is dropped.
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            max_size: 100,
            max_retries: 3,
        }
    }
}

/// Durable queue of requests awaiting connectivity.
///
/// Entries are held sorted by `(priority desc, created_at asc)` — FIFO breaks
/// ties — and re-persisted as a JSON array after every mutation. Expired
/// entries are filtered at every read and are never handed to a replayer.
/// A corrupt persisted file is replaced by an empty queue at open.
#[derive(Debug)]
pub struct OfflineQueue {
    path: PathBuf,
    config: QueueConfig,
    entries: Mutex<Vec<QueuedRequest>>,
    processing: AtomicBool,
}

impl OfflineQueue {
    /// Open the queue persisted at `path`, creating it if absent.
    pub async fn open(path: impl Into<PathBuf>, config: QueueConfig) -> Result<Self, QueueError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let entries: Vec<QueuedRequest> = match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(error = %e, "corrupt offline queue file, starting empty");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let queue = OfflineQueue {
            path,
            config,
            entries: Mutex::new(entries),
            processing: AtomicBool::new(false),
        };
        {
            let mut entries = queue.entries.lock().await;
            Self::sort(&mut entries);
            queue.persist(&entries).await?;
        }
        Ok(queue)
    }

    fn sort(entries: &mut [QueuedRequest]) {
        entries.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
    }

    async fn persist(&self, entries: &[QueuedRequest]) -> Result<(), QueueError> {
        let json = serde_json::to_vec(entries)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &json).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Add an entry, or fail with [`QueueError::Full`] at capacity.
    pub async fn enqueue(&self, entry: QueuedRequest) -> Result<(), QueueError> {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.config.max_size {
            return Err(QueueError::Full {
                capacity: self.config.max_size,
            });
        }
        tracing::debug!(id = %entry.id, priority = entry.priority, "request enqueued for replay");
        entries.push(entry);
        Self::sort(&mut entries);
        self.persist(&entries).await
    }

    /// Remove and return the highest-priority non-expired entry.
    ///
    /// Expired entries encountered on the way are dropped and persisted away.
    pub async fn dequeue(&self) -> Option<QueuedRequest> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        let now = Utc::now();
        entries.retain(|e| !e.is_expired_at(now));
        let entry = if entries.is_empty() {
            None
        } else {
            Some(entries.remove(0))
        };
        if entry.is_some() || entries.len() != before {
            if let Err(e) = self.persist(&entries).await {
                tracing::warn!(error = %e, "queue persist after dequeue failed");
            }
        }
        entry
    }

    /// The entry that `dequeue` would return, without consuming it.
    pub async fn peek(&self) -> Option<QueuedRequest> {
        let now = Utc::now();
        self.entries
            .lock()
            .await
            .iter()
            .find(|e| !e.is_expired_at(now))
            .cloned()
    }

    /// Remove the entry with `id`. Returns whether one was present.
    pub async fn remove(&self, id: Uuid) -> bool {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if removed {
            if let Err(e) = self.persist(&entries).await {
                tracing::warn!(error = %e, "queue persist after remove failed");
            }
        }
        removed
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
        if let Err(e) = self.persist(&entries).await {
            tracing::warn!(error = %e, "queue persist after clear failed");
        }
    }

    /// All non-expired entries in drain order.
    pub async fn get_all(&self) -> Vec<QueuedRequest> {
        let now = Utc::now();
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| !e.is_expired_at(now))
            .cloned()
            .collect()
    }

    /// Number of stored entries, expired included until the next dequeue.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the queue holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Re-serialize the queue immediately. Used at engine shutdown.
    pub async fn persist_now(&self) -> Result<(), QueueError> {
        let entries = self.entries.lock().await;
        self.persist(&entries).await
    }

    /// Drain the queue through `replayer`, reporting each outcome.
    ///
    /// Only one drain runs at a time; a call that finds a drain in progress
    /// returns `0` immediately. Each dequeued entry is replayed; on failure
    /// its retry counter is incremented and it is re-enqueued while it stays
    /// under the per-entry cap and unexpired, otherwise it is dropped.
    /// Returns the number of successfully replayed entries.
    pub async fn process<F>(&self, replayer: &dyn Replayer, mut on_event: F) -> usize
    where
        F: FnMut(QueueEvent) + Send,
    {
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("queue drain already in progress, skipping");
            return 0;
        }
        let guard = ProcessingGuard {
            flag: &self.processing,
        };

        let mut replayed = 0;
        while let Some(mut entry) = self.dequeue().await {
            match replayer.replay(&entry).await {
                Ok(()) => {
                    replayed += 1;
                    on_event(QueueEvent::Replayed { id: entry.id });
                }
                Err(e) => {
                    entry.retry_count += 1;
                    entry.last_error = Some(e.to_string());
                    if entry.retry_count < self.config.max_retries && !entry.is_expired() {
                        on_event(QueueEvent::Requeued {
                            id: entry.id,
                            retry_count: entry.retry_count,
                        });
                        if let Err(e) = self.enqueue(entry).await {
                            tracing::warn!(error = %e, "re-enqueue after failed replay failed");
                        }
                    } else {
                        tracing::warn!(id = %entry.id, error = %e, "queued request dropped");
                        on_event(QueueEvent::Dropped {
                            id: entry.id,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        drop(guard);
        replayed
    }
}

struct ProcessingGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
