//! Engine-wide defaults.

use std::sync::Arc;
use std::time::Duration;

use volley_core::codec::{Codec, JsonCodec};
use volley_core::policy::RetryPolicy;

use crate::breaker::BreakerConfig;

/// Defaults applied when an endpoint does not override them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-attempt timeout for endpoints without their own.
    pub default_timeout: Duration,
    /// Cache TTL for endpoints without their own.
    pub default_ttl: Option<Duration>,
    /// Retry policy for endpoints without their own.
    pub default_retry: RetryPolicy,
    /// Circuit breaker thresholds.
    pub breaker: BreakerConfig,
    /// Delay dispatch to hosts whose rate-limit window is exhausted.
    pub respect_rate_limits: bool,
    /// Codec used to decode responses (and encode queued replays).
    pub default_codec: Arc<dyn Codec>,
    /// Priority assigned to requests enqueued after offline failures.
    pub offline_priority: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_timeout: Duration::from_secs(30),
            default_ttl: Some(Duration::from_secs(300)),
            default_retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            respect_rate_limits: true,
            default_codec: Arc::new(JsonCodec),
            offline_priority: 0,
        }
    }
}
