//! Per-call context carried through the pipeline.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use smol_str::SmolStr;
use uuid::Uuid;

/// Tag the sync manager puts on replayed calls so a failure never re-enters
/// the offline queue.
pub const NO_REQUEUE_TAG: &str = "no-requeue";

/// Metadata that travels with one logical call.
///
/// The engine is the only writer; interceptors and observers read it. The
/// retry counter is per-logical-call and monotonically increasing.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    started_at: DateTime<Utc>,
    retry_count: u32,
    tags: HashSet<SmolStr>,
    metadata: HashMap<SmolStr, String>,
}

impl RequestContext {
    /// A fresh context with a unique request id.
    pub fn new() -> Self {
        RequestContext {
            request_id: Uuid::new_v4(),
            started_at: Utc::now(),
            retry_count: 0,
            tags: HashSet::new(),
            metadata: HashMap::new(),
        }
    }

    /// A fresh context carrying the given tags.
    pub fn with_tags<I, T>(tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<SmolStr>,
    {
        let mut ctx = RequestContext::new();
        ctx.tags = tags.into_iter().map(Into::into).collect();
        ctx
    }

    /// Unique id of this logical call.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// When the call entered the engine.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Number of retries performed so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Record one more retry.
    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    /// Whether the call carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Attach a tag.
    pub fn add_tag(&mut self, tag: impl Into<SmolStr>) {
        self.tags.insert(tag.into());
    }

    /// All tags on the call.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(SmolStr::as_str)
    }

    /// Free-form metadata value.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Insert a metadata entry, replacing any previous value.
    pub fn insert_metadata(&mut self, key: impl Into<SmolStr>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        RequestContext::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(
            RequestContext::new().request_id(),
            RequestContext::new().request_id()
        );
    }

    #[test]
    fn tags_and_metadata_round_trip() {
        let mut ctx = RequestContext::with_tags(["replay"]);
        assert!(ctx.has_tag("replay"));
        assert!(!ctx.has_tag(NO_REQUEUE_TAG));
        ctx.add_tag(NO_REQUEUE_TAG);
        assert!(ctx.has_tag(NO_REQUEUE_TAG));

        ctx.insert_metadata("trace", "abc");
        assert_eq!(ctx.metadata("trace"), Some("abc"));
        assert_eq!(ctx.metadata("missing"), None);
    }

    #[test]
    fn retry_counter_is_monotonic() {
        let mut ctx = RequestContext::new();
        assert_eq!(ctx.retry_count(), 0);
        ctx.increment_retry();
        ctx.increment_retry();
        assert_eq!(ctx.retry_count(), 2);
    }
}
