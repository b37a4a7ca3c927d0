//! The request engine: orchestration of one logical call.
//!
//! `execute` runs the full pipeline — assembly, pre-request interceptors,
//! credential attachment, cache lookup, the breaker/rate-limit/retry loop,
//! status classification, cache write-through, post-response interceptors,
//! decode — and returns a typed [`Response`]. `execute_raw`, `upload`,
//! `download` and `stream` reuse the same stages with different tails.
//!
//! Cancellation is drop-based: dropping the returned future abandons the
//! call at its current suspension point. Cache and queue mutations are
//! atomic, so an abandoned call leaves no partial state, and a cancelled
//! call never enqueues itself for offline replay.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use volley_cache::Cache;
use volley_core::codec::CodecExt;
use volley_core::endpoint::MethodExt;
use volley_core::{
    CacheKey, CachePolicy, Endpoint, Error, NO_REQUEUE_TAG, RequestBody, RequestContext, Response,
    ResponseMetadata, RetryPolicy, WireRequest,
};
use volley_queue::{
    OfflineQueue, QueuedRequest, ReachabilityMonitor, Replayer, SyncManager,
};

use crate::auth::Authenticator;
use crate::breaker::{CircuitBreaker, CircuitState};
use crate::config::EngineConfig;
use crate::interceptor::{Interceptor, run_after, run_before};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::ratelimit::{RateLimitInfo, RateLimitObserver, parse_retry_after};
use crate::streaming::{ByteStream, ProgressFn, ProgressStream, ensure_streamable};
use crate::transport::{RawResponse, StreamingResponse, Transport};

/// The request-pipeline orchestrator.
///
/// One engine owns one transport, one cache handle, one offline queue, one
/// circuit breaker and one reachability observer; all of them are safe to
/// share with the sync manager. Interceptors run in registration order
/// before dispatch and in reverse order after.
pub struct RequestEngine {
    transport: Arc<dyn Transport>,
    cache: Option<Arc<dyn Cache>>,
    queue: Option<Arc<OfflineQueue>>,
    reachability: Option<ReachabilityMonitor>,
    authenticator: RwLock<Option<Arc<dyn Authenticator>>>,
    interceptors: RwLock<Vec<Arc<dyn Interceptor>>>,
    breaker: CircuitBreaker,
    ratelimit: RateLimitObserver,
    metrics: EngineMetrics,
    config: EngineConfig,
}

impl RequestEngine {
    /// Start building an engine around `transport`.
    pub fn builder(transport: Arc<dyn Transport>) -> RequestEngineBuilder {
        RequestEngineBuilder {
            transport,
            cache: None,
            queue: None,
            reachability: None,
            authenticator: None,
            interceptors: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    fn interceptor_chain(&self) -> Vec<Arc<dyn Interceptor>> {
        self.interceptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn current_authenticator(&self) -> Option<Arc<dyn Authenticator>> {
        self.authenticator
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register an interceptor at the end of the chain.
    pub fn add_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(interceptor);
    }

    /// Remove every registered interceptor.
    pub fn clear_interceptors(&self) {
        self.interceptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Install the authenticator used for endpoints that require auth.
    pub fn set_authenticator(&self, authenticator: Arc<dyn Authenticator>) {
        *self
            .authenticator
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(authenticator);
    }

    /// Execute a call and decode the payload with the engine codec.
    pub async fn execute<T>(&self, endpoint: &Endpoint) -> Result<Response<T>, Error>
    where
        T: DeserializeOwned,
    {
        let mut ctx = RequestContext::new();
        self.execute_in_context(endpoint, &mut ctx).await
    }

    /// Execute a call under an existing context (retry counters, tags).
    pub async fn execute_in_context<T>(
        &self,
        endpoint: &Endpoint,
        ctx: &mut RequestContext,
    ) -> Result<Response<T>, Error>
    where
        T: DeserializeOwned,
    {
        let started = Instant::now();
        let outcome = async {
            let (mut raw, from_cache) = self.run_call(endpoint, ctx, None).await?;
            if !from_cache {
                let chain = self.interceptor_chain();
                run_after(&chain, &mut raw, ctx).await?;
            }
            let payload: T = self.config.default_codec.decode(&raw.body)?;
            Ok::<_, Error>((raw, from_cache, payload))
        }
        .await;

        match outcome {
            Ok((raw, from_cache, payload)) => {
                let size = raw.body.len() as u64;
                self.metrics.record_success(started.elapsed(), size);
                let metadata = ResponseMetadata {
                    request_id: ctx.request_id(),
                    started_at: ctx.started_at(),
                    finished_at: Utc::now(),
                    time_to_first_byte: raw.time_to_first_byte,
                    size_bytes: size,
                    from_cache,
                    retry_count: ctx.retry_count(),
                };
                Ok(Response::new(
                    payload,
                    raw.status,
                    raw.headers,
                    raw.url,
                    metadata,
                ))
            }
            Err(error) => {
                self.metrics.record_failure(started.elapsed());
                Err(error)
            }
        }
    }

    /// Execute a call and return the raw response without decoding.
    pub async fn execute_raw(&self, endpoint: &Endpoint) -> Result<RawResponse, Error> {
        let mut ctx = RequestContext::new();
        self.execute_raw_in_context(endpoint, &mut ctx).await
    }

    /// Raw execution under an existing context.
    pub async fn execute_raw_in_context(
        &self,
        endpoint: &Endpoint,
        ctx: &mut RequestContext,
    ) -> Result<RawResponse, Error> {
        let started = Instant::now();
        let outcome = async {
            let (mut raw, from_cache) = self.run_call(endpoint, ctx, None).await?;
            if !from_cache {
                let chain = self.interceptor_chain();
                run_after(&chain, &mut raw, ctx).await?;
            }
            Ok::<_, Error>(raw)
        }
        .await;

        match outcome {
            Ok(raw) => {
                self.metrics
                    .record_success(started.elapsed(), raw.body.len() as u64);
                Ok(raw)
            }
            Err(error) => {
                self.metrics.record_failure(started.elapsed());
                Err(error)
            }
        }
    }

    /// Send `bytes` as the request body, reporting transfer completion.
    ///
    /// The body replaces whatever the endpoint describes; the endpoint's
    /// method must allow one. Progress is reported with the cumulative byte
    /// count once the transfer has been accepted by the transport.
    pub async fn upload(
        &self,
        endpoint: &Endpoint,
        bytes: Bytes,
        progress: Option<ProgressFn>,
    ) -> Result<RawResponse, Error> {
        let total = bytes.len() as u64;
        let started = Instant::now();
        let mut ctx = RequestContext::new();
        let outcome = async {
            let (mut raw, _) = self.run_call(endpoint, &mut ctx, Some(bytes)).await?;
            let chain = self.interceptor_chain();
            run_after(&chain, &mut raw, &ctx).await?;
            Ok::<_, Error>(raw)
        }
        .await;

        match outcome {
            Ok(raw) => {
                if let Some(progress) = progress {
                    progress(total);
                }
                self.metrics
                    .record_success(started.elapsed(), raw.body.len() as u64);
                Ok(raw)
            }
            Err(error) => {
                self.metrics.record_failure(started.elapsed());
                Err(error)
            }
        }
    }

    /// Stream the response body into one buffer, reporting progress per chunk.
    pub async fn download(
        &self,
        endpoint: &Endpoint,
        progress: Option<ProgressFn>,
    ) -> Result<Bytes, Error> {
        let response = self.stream(endpoint, None).await?;
        match progress {
            Some(progress) => {
                ByteStream::new(ProgressStream::new(response.body, progress))
                    .collect()
                    .await
            }
            None => response.body.collect().await,
        }
    }

    /// Open a byte-chunk stream for SSE/WebSocket-style consumption.
    ///
    /// The response head is validated (2xx, and the expected content type
    /// when given) before the stream is handed out. The engine does not
    /// buffer or retry streams — reconnection policy belongs to the protocol
    /// frontend. Dropping the stream closes the underlying transport.
    pub async fn stream(
        &self,
        endpoint: &Endpoint,
        expected_content_type: Option<&str>,
    ) -> Result<StreamingResponse, Error> {
        let ctx = RequestContext::new();
        let mut wire = endpoint.to_wire_request()?;
        if wire.timeout.is_none() {
            wire.timeout = Some(self.config.default_timeout);
        }
        let chain = self.interceptor_chain();
        run_before(&chain, &mut wire, &ctx).await?;
        if endpoint.requires_auth() {
            let auth = self
                .current_authenticator()
                .ok_or(Error::AuthenticationRequired)?;
            auth.authenticate(&mut wire).await?;
        }
        if !self.breaker.should_allow() {
            self.metrics.record_breaker_rejection();
            return Err(Error::CircuitOpen);
        }
        match self.transport.stream(wire).await {
            Ok(response) => {
                match ensure_streamable(response.status, &response.headers, expected_content_type)
                {
                    Ok(()) => {
                        self.breaker.record_success();
                        Ok(response)
                    }
                    Err(error) => {
                        if error.is_recoverable() {
                            self.breaker.record_failure();
                        }
                        Err(error)
                    }
                }
            }
            Err(error) => {
                if error.is_recoverable() {
                    self.breaker.record_failure();
                }
                Err(error)
            }
        }
    }

    /// Drop every cached response. Idempotent.
    pub async fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear().await;
        }
    }

    /// Invalidate the cached response for one endpoint.
    pub async fn remove_cached(&self, endpoint: &Endpoint) -> Result<bool, Error> {
        let Some(cache) = &self.cache else {
            return Ok(false);
        };
        let wire = endpoint.to_wire_request()?;
        match wire.cache_key() {
            Some(key) => Ok(cache.remove(&key).await),
            None => Ok(false),
        }
    }

    /// A consistent copy of the per-engine counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Current circuit breaker state.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Last observed rate-limit state for `host`.
    pub fn rate_limit_info(&self, host: &str) -> Option<RateLimitInfo> {
        self.ratelimit.info(host)
    }

    /// The offline queue, when one is configured.
    pub fn offline_queue(&self) -> Option<&Arc<OfflineQueue>> {
        self.queue.as_ref()
    }

    /// The reachability observer, when one is configured.
    pub fn reachability(&self) -> Option<&ReachabilityMonitor> {
        self.reachability.as_ref()
    }

    /// A sync manager draining this engine's queue through this engine.
    ///
    /// Requires both an offline queue and a reachability observer.
    pub fn sync_manager(self: &Arc<Self>) -> Option<SyncManager> {
        let queue = self.queue.clone()?;
        let reachability = self.reachability.clone()?;
        Some(SyncManager::new(queue, reachability, self.clone()))
    }

    /// Persist pending state before the process exits.
    pub async fn shutdown(&self) {
        if let Some(queue) = &self.queue {
            if let Err(error) = queue.persist_now().await {
                tracing::warn!(%error, "queue persist at shutdown failed");
            }
        }
        tracing::debug!("engine shut down");
    }

    /// The pipeline shared by every buffered execution path. Returns the raw
    /// response and whether it was served from cache.
    async fn run_call(
        &self,
        endpoint: &Endpoint,
        ctx: &mut RequestContext,
        body_override: Option<Bytes>,
    ) -> Result<(RawResponse, bool), Error> {
        let mut wire = endpoint.to_wire_request()?;
        if let Some(body) = body_override {
            if !endpoint.method().allows_body() {
                return Err(Error::InvalidRequest(format!(
                    "{} requests cannot carry a body",
                    endpoint.method()
                )));
            }
            wire.body = Some(body);
        }
        if wire.timeout.is_none() {
            wire.timeout = Some(self.config.default_timeout);
        }

        let chain = self.interceptor_chain();
        run_before(&chain, &mut wire, ctx).await?;

        if endpoint.requires_auth() {
            let auth = self
                .current_authenticator()
                .ok_or(Error::AuthenticationRequired)?;
            auth.authenticate(&mut wire).await?;
        }

        // Only cacheable methods carry a key; everything else skips the
        // cache entirely, whatever the policy says.
        let cache_key = wire.cache_key();
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if endpoint.cache_policy().reads() {
                if let Some(bytes) = cache.get(key).await {
                    tracing::debug!(request_id = %ctx.request_id(), %key, "served from cache");
                    self.metrics.record_cache_hit();
                    return Ok((
                        RawResponse {
                            status: StatusCode::OK,
                            headers: HeaderMap::new(),
                            body: bytes,
                            url: wire.url.clone(),
                            time_to_first_byte: None,
                        },
                        true,
                    ));
                }
            }
        }

        let raw = match self.dispatch_with_retries(endpoint, &mut wire, ctx).await {
            Ok(raw) => raw,
            Err(error) => {
                self.maybe_enqueue(&wire, &error, ctx).await;
                return Err(error);
            }
        };

        if raw.status.is_success() {
            if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
                if endpoint.cache_policy().writes() {
                    let ttl = endpoint
                        .cache_policy()
                        .ttl_override()
                        .or(self.config.default_ttl);
                    if let Err(error) = cache.put(key.clone(), raw.body.clone(), ttl).await {
                        tracing::warn!(%key, %error, "cache write failed");
                    }
                }
            }
            // A successful mutation makes any cached read of the same URL stale.
            if wire.method.is_mutating() {
                if let Some(cache) = &self.cache {
                    cache.remove(&CacheKey::for_get(&wire.url)).await;
                }
            }
        }

        Ok((raw, false))
    }

    /// The breaker/rate-limit/retry loop around one transport dispatch.
    async fn dispatch_with_retries(
        &self,
        endpoint: &Endpoint,
        wire: &mut WireRequest,
        ctx: &mut RequestContext,
    ) -> Result<RawResponse, Error> {
        let retry_policy = endpoint
            .retry_policy()
            .cloned()
            .unwrap_or_else(|| self.config.default_retry.clone());
        let host = wire.host().map(str::to_owned);
        let mut attempt: u32 = 0;
        let mut auth_retried = false;

        loop {
            if !self.breaker.should_allow() {
                self.metrics.record_breaker_rejection();
                tracing::warn!(request_id = %ctx.request_id(), "circuit open, call rejected");
                return Err(Error::CircuitOpen);
            }
            if self.config.respect_rate_limits {
                if let Some(host) = &host {
                    if let Some(delay) = self.ratelimit.required_delay(host) {
                        tracing::debug!(host = %host, ?delay, "waiting for rate limit window reset");
                        tokio::time::sleep(delay).await;
                    }
                }
            }

            let error = match self.transport.send(wire.clone()).await {
                Ok(raw) => {
                    if let Some(host) = &host {
                        self.ratelimit.observe(host, &raw.headers);
                    }
                    if raw.status.is_success() {
                        self.breaker.record_success();
                        return Ok(raw);
                    }
                    if raw.status == StatusCode::UNAUTHORIZED
                        && endpoint.requires_auth()
                        && !auth_retried
                    {
                        // One-shot refresh-and-retry; does not consume the
                        // retry budget. A second 401 is terminal.
                        auth_retried = true;
                        let auth = self
                            .current_authenticator()
                            .ok_or(Error::AuthenticationRequired)?;
                        tracing::debug!(request_id = %ctx.request_id(), "401 received, refreshing credentials");
                        auth.refresh().await?;
                        auth.authenticate(wire).await?;
                        continue;
                    }
                    let retry_after = parse_retry_after(&raw.headers);
                    Error::from_status(raw.status, raw.body, retry_after)
                }
                Err(error) => error,
            };

            if error.is_recoverable() {
                self.breaker.record_failure();
            }

            if retry_policy.should_retry(&error, attempt) {
                let mut delay = retry_policy.delay(attempt);
                if let Some(server_delay) = error.retry_after() {
                    // Retry-After wins when it asks for a longer wait.
                    delay = delay.max(server_delay);
                }
                tracing::debug!(
                    request_id = %ctx.request_id(),
                    attempt,
                    ?delay,
                    %error,
                    "attempt failed, retrying"
                );
                self.metrics.record_retry();
                tokio::time::sleep(delay).await;
                attempt += 1;
                ctx.increment_retry();
                continue;
            }

            return if retry_policy.max_attempts > 0
                && attempt >= retry_policy.max_attempts
                && error.is_recoverable()
            {
                Err(Error::RetriesExhausted {
                    attempts: attempt + 1,
                    source: Box::new(error),
                })
            } else {
                Err(error)
            };
        }
    }

    /// Queue a failed mutating request for replay once connectivity returns.
    async fn maybe_enqueue(&self, wire: &WireRequest, error: &Error, ctx: &RequestContext) {
        let Some(queue) = &self.queue else { return };
        if ctx.has_tag(NO_REQUEUE_TAG) {
            return;
        }
        if !wire.method.is_mutating() {
            return;
        }
        if !error.terminal_cause().is_connectivity() {
            return;
        }
        let entry = QueuedRequest::from_wire(wire, self.config.offline_priority);
        let id = entry.id;
        match queue.enqueue(entry).await {
            Ok(()) => {
                tracing::info!(request_id = %ctx.request_id(), %id, "request enqueued for offline replay");
            }
            Err(error) => {
                tracing::warn!(request_id = %ctx.request_id(), %error, "offline enqueue failed");
            }
        }
    }
}

impl std::fmt::Debug for RequestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEngine")
            .field("cache", &self.cache.is_some())
            .field("queue", &self.queue.is_some())
            .field("breaker", &self.breaker.state())
            .finish_non_exhaustive()
    }
}

/// Queued entries replay through the engine with the no-requeue tag, so a
/// failed replay is reported to the queue instead of cycling back in through
/// the offline path. Replays run without an engine-level retry budget — the
/// queue owns per-entry retry accounting.
#[async_trait]
impl Replayer for RequestEngine {
    async fn replay(&self, entry: &QueuedRequest) -> Result<(), Error> {
        let method = Method::from_bytes(entry.method.as_bytes())
            .map_err(|e| Error::InvalidRequest(e.to_string()))?;
        let mut builder = Endpoint::builder(entry.url.clone(), "")
            .method(method)
            .cache_policy(CachePolicy::Disabled)
            .retry_policy(RetryPolicy::none());
        for (name, value) in &entry.headers {
            builder = builder.header(name.clone(), value.clone());
        }
        if let Some(body) = &entry.body {
            let media_type = entry
                .headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
                .map(|(_, value)| value.clone())
                .unwrap_or_else(|| "application/octet-stream".to_owned());
            builder = builder.body(RequestBody::raw(body.clone(), media_type));
        }
        let endpoint = builder.build();
        let mut ctx = RequestContext::with_tags([NO_REQUEUE_TAG]);
        self.run_call(&endpoint, &mut ctx, None).await?;
        Ok(())
    }
}

/// Builder for [`RequestEngine`].
pub struct RequestEngineBuilder {
    transport: Arc<dyn Transport>,
    cache: Option<Arc<dyn Cache>>,
    queue: Option<Arc<OfflineQueue>>,
    reachability: Option<ReachabilityMonitor>,
    authenticator: Option<Arc<dyn Authenticator>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    config: EngineConfig,
}

impl RequestEngineBuilder {
    /// Attach a response cache.
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attach an offline queue.
    pub fn offline_queue(mut self, queue: Arc<OfflineQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Attach a reachability observer.
    pub fn reachability(mut self, monitor: ReachabilityMonitor) -> Self {
        self.reachability = Some(monitor);
        self
    }

    /// Install the initial authenticator.
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Register an interceptor.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Override the engine defaults.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Finish the engine.
    pub fn build(self) -> RequestEngine {
        RequestEngine {
            transport: self.transport,
            cache: self.cache,
            queue: self.queue,
            reachability: self.reachability,
            authenticator: RwLock::new(self.authenticator),
            interceptors: RwLock::new(self.interceptors),
            breaker: CircuitBreaker::new(self.config.breaker),
            ratelimit: RateLimitObserver::new(),
            metrics: EngineMetrics::new(),
            config: self.config,
        }
    }
}

impl std::fmt::Debug for RequestEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEngineBuilder")
            .field("cache", &self.cache.is_some())
            .field("queue", &self.queue.is_some())
            .field("interceptors", &self.interceptors.len())
            .finish_non_exhaustive()
    }
}
