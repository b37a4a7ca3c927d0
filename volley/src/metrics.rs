//! Per-engine call counters and the optional `metrics` facade emission.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Track number of executed calls by outcome.
    pub static ref REQUESTS_TOTAL: &'static str = {
        metrics::describe_counter!(
            "engine_requests_total",
            "Total number of executed calls by outcome."
        );
        "engine_requests_total"
    };
    /// Metric of call duration.
    pub static ref REQUEST_DURATION: &'static str = {
        metrics::describe_histogram!(
            "engine_request_duration_seconds",
            metrics::Unit::Seconds,
            "End-to-end call latencies in seconds."
        );
        "engine_request_duration_seconds"
    };
    /// Track number of responses served from cache.
    pub static ref CACHE_HITS: &'static str = {
        metrics::describe_counter!(
            "engine_cache_hit_total",
            "Total number of calls answered from the response cache."
        );
        "engine_cache_hit_total"
    };
    /// Track number of retries performed.
    pub static ref RETRIES_TOTAL: &'static str = {
        metrics::describe_counter!(
            "engine_retries_total",
            "Total number of retry attempts."
        );
        "engine_retries_total"
    };
    /// Track number of calls rejected by the open breaker.
    pub static ref BREAKER_REJECTIONS: &'static str = {
        metrics::describe_counter!(
            "engine_breaker_rejections_total",
            "Total number of calls rejected while the circuit breaker was open."
        );
        "engine_breaker_rejections_total"
    };
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    success: u64,
    fail: u64,
    total_duration: Duration,
    bytes: u64,
}

/// Point-in-time copy of the aggregate counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    /// Calls executed.
    pub total: u64,
    /// Calls that produced a response.
    pub success: u64,
    /// Calls that failed.
    pub fail: u64,
    /// Mean end-to-end duration across all calls.
    pub average_duration: Duration,
    /// Cumulative response payload bytes.
    pub bytes: u64,
    /// `success / total`, or `0.0` before the first call.
    pub success_rate: f64,
}

/// Thread-safe aggregate counters.
///
/// Snapshots are taken under the same critical section as updates, so the
/// returned numbers are mutually consistent.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    inner: Mutex<Counters>,
}

impl EngineMetrics {
    /// Zeroed counters.
    pub fn new() -> Self {
        EngineMetrics::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a completed call.
    pub fn record_success(&self, duration: Duration, bytes: u64) {
        let mut counters = self.lock();
        counters.total += 1;
        counters.success += 1;
        counters.total_duration += duration;
        counters.bytes += bytes;
        drop(counters);
        #[cfg(feature = "metrics")]
        {
            metrics::counter!(*REQUESTS_TOTAL, "outcome" => "success").increment(1);
            metrics::histogram!(*REQUEST_DURATION).record(duration.as_secs_f64());
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, duration: Duration) {
        let mut counters = self.lock();
        counters.total += 1;
        counters.fail += 1;
        counters.total_duration += duration;
        drop(counters);
        #[cfg(feature = "metrics")]
        {
            metrics::counter!(*REQUESTS_TOTAL, "outcome" => "failure").increment(1);
            metrics::histogram!(*REQUEST_DURATION).record(duration.as_secs_f64());
        }
    }

    /// Record a cache-served response.
    pub fn record_cache_hit(&self) {
        #[cfg(feature = "metrics")]
        metrics::counter!(*CACHE_HITS).increment(1);
    }

    /// Record one retry attempt.
    pub fn record_retry(&self) {
        #[cfg(feature = "metrics")]
        metrics::counter!(*RETRIES_TOTAL).increment(1);
    }

    /// Record a breaker rejection.
    pub fn record_breaker_rejection(&self) {
        #[cfg(feature = "metrics")]
        metrics::counter!(*BREAKER_REJECTIONS).increment(1);
    }

    /// A consistent copy of the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.lock();
        let average_duration = if counters.total > 0 {
            counters.total_duration / counters.total as u32
        } else {
            Duration::ZERO
        };
        let success_rate = if counters.total > 0 {
            counters.success as f64 / counters.total as f64
        } else {
            0.0
        };
        MetricsSnapshot {
            total: counters.total,
            success: counters.success,
            fail: counters.fail,
            average_duration,
            bytes: counters.bytes,
            success_rate,
        }
    }
}
