//! Request-execution engine for client applications.
//!
//! `volley` composes caching, retries with backoff, circuit breaking,
//! interceptor middleware, authentication with single-flight refresh, and an
//! offline queue with background synchronization behind one uniform
//! [`Endpoint`] abstraction. REST, GraphQL, WebSocket, SSE and gRPC
//! frontends all drive the same [`RequestEngine`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use volley::{Endpoint, RequestEngine};
//! # use volley::transport::Transport;
//! # async fn demo(transport: Arc<dyn Transport>) -> Result<(), volley::Error> {
//! # #[derive(serde::Deserialize)] struct User { id: u64 }
//! let engine = RequestEngine::builder(transport).build();
//! let user: volley::Response<User> = engine
//!     .execute(&Endpoint::get("https://api.example.com", "users/1"))
//!     .await?;
//! assert!(user.is_success());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Credential schemes and refresh coordination.
pub mod auth;

/// Circuit breaker gating transport attempts.
pub mod breaker;

/// Engine-wide defaults.
pub mod config;

mod engine;

/// Middleware hooks over requests and raw responses.
pub mod interceptor;

/// Aggregate call counters and optional `metrics` facade emission.
pub mod metrics;

/// Rate-limit header interpretation and per-host pacing.
pub mod ratelimit;

/// Byte-chunk streams and progress adapters.
pub mod streaming;

/// The transport seam implemented by HTTP client integrations.
pub mod transport;

pub use engine::{RequestEngine, RequestEngineBuilder};

pub use auth::{
    ApiKeyAuthenticator, Authenticator, BasicAuthenticator, BearerAuthenticator, OAuth2Authenticator,
    OAuth2Config, TokenRefresher, TokenSet,
};
pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use config::EngineConfig;
pub use interceptor::Interceptor;
pub use metrics::MetricsSnapshot;
pub use ratelimit::RateLimitInfo;
pub use streaming::{ByteStream, ProgressFn, ProgressStream};
pub use transport::{RawResponse, StreamingResponse, Transport};

pub use volley_core::{
    Backoff, CacheEntry, CacheKey, CachePolicy, CacheSettings, Codec, CodecExt, Endpoint,
    EndpointBuilder, Error, Jitter, JsonCodec, MethodExt, MultipartPart, NO_REQUEUE_TAG, Raw,
    RequestBody, RequestContext, Response, ResponseMetadata, RetryPolicy, WireRequest,
};

/// Cache tiers re-exported for engine construction.
pub mod cache {
    pub use volley_cache::{Cache, CacheError, DiskCache, HybridCache, MemoryCache};
}

/// Offline queue, reachability and sync re-exported for engine construction.
pub mod queue {
    pub use volley_queue::{
        OfflineQueue, QueueConfig, QueueError, QueueEvent, QueuedRequest, ReachabilityMonitor,
        ReachabilityStatus, Replayer, SubscriptionId, SyncManager, SyncStatus,
    };
}

/// The `volley` prelude.
///
/// ```rust
/// use volley::prelude::*;
/// ```
pub mod prelude {
    pub use crate::cache::Cache;
    pub use crate::{Endpoint, Error, RequestEngine, Response, Transport};
}
