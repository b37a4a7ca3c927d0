//! Cached value with expiry metadata and validators.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Response bytes plus the metadata that governs their lifetime.
///
/// An entry is expired exactly when it has a TTL and `now - created_at`
/// exceeds it; entries without a TTL never expire on their own. The optional
/// validators (`ETag`, `Last-Modified`) ride along for conditional-request
/// use by callers; they do not affect expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    bytes: Bytes,
    created_at: DateTime<Utc>,
    ttl: Option<Duration>,
    etag: Option<String>,
    last_modified: Option<String>,
}

impl CacheEntry {
    /// An entry created now.
    pub fn new(bytes: impl Into<Bytes>, ttl: Option<Duration>) -> Self {
        CacheEntry {
            bytes: bytes.into(),
            created_at: Utc::now(),
            ttl,
            etag: None,
            last_modified: None,
        }
    }

    /// Reconstruct an entry with an explicit creation time.
    ///
    /// Used when rehydrating from disk and when promoting between tiers,
    /// where the original creation time must be preserved.
    pub fn from_parts(
        bytes: impl Into<Bytes>,
        created_at: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Self {
        CacheEntry {
            bytes: bytes.into(),
            created_at,
            ttl,
            etag: None,
            last_modified: None,
        }
    }

    /// Attach a strong validator.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Attach a weak validator.
    pub fn with_last_modified(mut self, last_modified: impl Into<String>) -> Self {
        self.last_modified = Some(last_modified.into());
        self
    }

    /// The cached bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Consume the entry, keeping only the bytes.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// When the entry was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The configured time-to-live, if any.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// The strong validator, if any.
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// The weak validator, if any.
    pub fn last_modified(&self) -> Option<&str> {
        self.last_modified.as_deref()
    }

    /// Absolute expiry instant, when a TTL is set.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.ttl.and_then(|ttl| {
            self.created_at
                .checked_add_signed(chrono::Duration::from_std(ttl).ok()?)
        })
    }

    /// Whether the entry is past its TTL at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires) => now > expires,
            None => false,
        }
    }

    /// Whether the entry is past its TTL right now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Payload size in bytes, the unit every cache cap is measured in.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}
