//! Endpoint description and wire-request assembly.
//!
//! An [`Endpoint`] is the uniform description of one remote operation: where
//! it lives, how it is called, and which policies govern the call. Protocol
//! frontends build endpoints; the engine turns them into a [`WireRequest`]
//! via [`Endpoint::to_wire_request`] and never looks back at the endpoint.

use std::time::Duration;

use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;

use crate::body::RequestBody;
use crate::error::Error;
use crate::key::CacheKey;
use crate::policy::{CachePolicy, RetryPolicy};

/// Method classification used across the engine.
pub trait MethodExt {
    /// Whether requests with this method may carry a body.
    fn allows_body(&self) -> bool;
    /// Whether responses to this method are cache-eligible (GET/HEAD only).
    fn is_cacheable(&self) -> bool;
    /// Whether this method mutates server state.
    fn is_mutating(&self) -> bool;
}

impl MethodExt for Method {
    fn allows_body(&self) -> bool {
        matches!(
            *self,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }

    fn is_cacheable(&self) -> bool {
        matches!(*self, Method::GET | Method::HEAD)
    }

    fn is_mutating(&self) -> bool {
        matches!(
            *self,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }
}

/// Description of a single remote operation.
#[derive(Debug)]
pub struct Endpoint {
    base_url: String,
    path: String,
    method: Method,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    body: Option<RequestBody>,
    timeout: Option<Duration>,
    cache: CachePolicy,
    retry: Option<RetryPolicy>,
    requires_auth: bool,
    content_type: Option<String>,
    accept: Option<String>,
}

impl Endpoint {
    /// Start building an endpoint.
    pub fn builder(base_url: impl Into<String>, path: impl Into<String>) -> EndpointBuilder {
        EndpointBuilder {
            endpoint: Endpoint {
                base_url: base_url.into(),
                path: path.into(),
                method: Method::GET,
                headers: Vec::new(),
                query: Vec::new(),
                body: None,
                timeout: None,
                cache: CachePolicy::default(),
                retry: None,
                requires_auth: false,
                content_type: None,
                accept: None,
            },
        }
    }

    /// A GET endpoint with default policies.
    pub fn get(base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Endpoint::builder(base_url, path).build()
    }

    /// A POST endpoint carrying `body`.
    pub fn post(base_url: impl Into<String>, path: impl Into<String>, body: RequestBody) -> Self {
        Endpoint::builder(base_url, path)
            .method(Method::POST)
            .body(body)
            .build()
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Per-endpoint timeout override.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The cache policy.
    pub fn cache_policy(&self) -> &CachePolicy {
        &self.cache
    }

    /// The retry policy override, if any.
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    /// Whether the authenticator must run before dispatch.
    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    /// Resolve the URL, headers and body into a transport-layer request.
    ///
    /// Query parameters are appended in insertion order so assembled URLs are
    /// reproducible. User headers override the content-type/accept defaults.
    /// Fails with [`Error::InvalidUrl`] when composition does not yield an
    /// absolute URL, [`Error::InvalidRequest`] for malformed headers or a
    /// body on a bodyless method, and [`Error::EncodingFailed`] when the body
    /// encoder fails.
    pub fn to_wire_request(&self) -> Result<WireRequest, Error> {
        if self.body.is_some() && !self.method.allows_body() {
            return Err(Error::InvalidRequest(format!(
                "{} requests cannot carry a body",
                self.method
            )));
        }

        let mut url = self.resolve_url()?;
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }

        let encoded = self.body.as_ref().map(|b| b.encode()).transpose()?;

        let mut headers = HeaderMap::new();
        let content_type = self
            .content_type
            .clone()
            .or_else(|| encoded.as_ref().map(|e| e.media_type.clone()));
        if let Some(value) = content_type {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_str(&value)
                    .map_err(|e| Error::InvalidRequest(e.to_string()))?,
            );
        }
        if let Some(accept) = &self.accept {
            headers.insert(
                ACCEPT,
                HeaderValue::from_str(accept).map_err(|e| Error::InvalidRequest(e.to_string()))?,
            );
        }
        for (name, value) in &self.headers {
            let name: HeaderName = name
                .parse()
                .map_err(|_| Error::InvalidRequest(format!("invalid header name: {name}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::InvalidRequest(e.to_string()))?;
            headers.insert(name, value);
        }

        Ok(WireRequest {
            method: self.method.clone(),
            url,
            headers,
            body: encoded.map(|e| e.bytes),
            timeout: self.timeout,
        })
    }

    fn resolve_url(&self) -> Result<Url, Error> {
        let combined = if self.path.is_empty() {
            self.base_url.clone()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                self.path.trim_start_matches('/')
            )
        };
        let url = Url::parse(&combined).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(Error::InvalidUrl(format!("not an absolute URL: {combined}")));
        }
        Ok(url)
    }
}

/// Builder for [`Endpoint`].
#[derive(Debug)]
pub struct EndpointBuilder {
    endpoint: Endpoint,
}

impl EndpointBuilder {
    /// Set the method.
    pub fn method(mut self, method: Method) -> Self {
        self.endpoint.method = method;
        self
    }

    /// Add a header. Later entries with the same name win.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.endpoint.headers.push((name.into(), value.into()));
        self
    }

    /// Add a query parameter; order of insertion is preserved on the wire.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.endpoint.query.push((key.into(), value.into()));
        self
    }

    /// Attach a body.
    pub fn body(mut self, body: RequestBody) -> Self {
        self.endpoint.body = Some(body);
        self
    }

    /// Per-endpoint timeout, overriding the engine default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.endpoint.timeout = Some(timeout);
        self
    }

    /// Cache policy for this endpoint.
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.endpoint.cache = policy;
        self
    }

    /// Retry policy override for this endpoint.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.endpoint.retry = Some(policy);
        self
    }

    /// Require the authenticator to run before dispatch.
    pub fn requires_auth(mut self, requires: bool) -> Self {
        self.endpoint.requires_auth = requires;
        self
    }

    /// Override the content type derived from the body.
    pub fn content_type(mut self, value: impl Into<String>) -> Self {
        self.endpoint.content_type = Some(value.into());
        self
    }

    /// Set the accept header default.
    pub fn accept(mut self, value: impl Into<String>) -> Self {
        self.endpoint.accept = Some(value.into());
        self
    }

    /// Finish the endpoint.
    pub fn build(self) -> Endpoint {
        self.endpoint
    }
}

/// A transport-layer request: everything needed to put bytes on the wire.
#[derive(Debug, Clone)]
pub struct WireRequest {
    /// Request method.
    pub method: Method,
    /// Absolute URL, query included.
    pub url: Url,
    /// Header map; names are case-insensitive on the wire.
    pub headers: HeaderMap,
    /// Encoded body bytes, when present.
    pub body: Option<bytes::Bytes>,
    /// Per-attempt timeout override.
    pub timeout: Option<Duration>,
}

impl WireRequest {
    /// The cache key for this request, or `None` for non-cacheable methods.
    pub fn cache_key(&self) -> Option<CacheKey> {
        CacheKey::for_request(&self.method, &self.url, self.body.as_deref())
    }

    /// The host this request targets.
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_base_and_path_with_slash_normalization() {
        for (base, path) in [
            ("https://api.example.com", "users/1"),
            ("https://api.example.com/", "users/1"),
            ("https://api.example.com", "/users/1"),
            ("https://api.example.com/", "/users/1"),
        ] {
            let wire = Endpoint::get(base, path).to_wire_request().unwrap();
            assert_eq!(wire.url.as_str(), "https://api.example.com/users/1");
        }
    }

    fn assembled(builder: EndpointBuilder) -> WireRequest {
        builder.build().to_wire_request().unwrap()
    }

    #[test]
    fn query_parameters_keep_insertion_order() {
        let wire = assembled(
            Endpoint::builder("https://api.example.com", "search")
                .query("z", "1")
                .query("a", "2")
                .query("m", "3"),
        );
        assert_eq!(wire.url.query(), Some("z=1&a=2&m=3"));
    }

    #[test]
    fn user_headers_override_defaults() {
        let wire = assembled(
            Endpoint::builder("https://api.example.com", "users")
                .method(Method::POST)
                .body(RequestBody::raw("{}", "application/json"))
                .header("content-type", "application/vnd.custom+json"),
        );
        assert_eq!(
            wire.headers.get(CONTENT_TYPE).unwrap(),
            "application/vnd.custom+json"
        );
    }

    #[test]
    fn content_type_defaults_to_body_media_type() {
        let wire = assembled(
            Endpoint::builder("https://api.example.com", "users")
                .method(Method::POST)
                .body(RequestBody::form([("a", "1")])),
        );
        assert_eq!(
            wire.headers.get(CONTENT_TYPE).unwrap(),
            "application/x-www-form-urlencoded"
        );
    }

    #[test]
    fn malformed_url_is_rejected() {
        let err = Endpoint::get("not a url", "x").to_wire_request().unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));

        let err = Endpoint::get("data:text/plain,hi", "")
            .to_wire_request()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
    }

    #[test]
    fn body_on_bodyless_method_is_rejected() {
        let err = Endpoint::builder("https://api.example.com", "x")
            .body(RequestBody::raw("data", "text/plain"))
            .build()
            .to_wire_request()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn timeout_is_carried_through() {
        let wire = assembled(
            Endpoint::builder("https://api.example.com", "slow").timeout(Duration::from_secs(5)),
        );
        assert_eq!(wire.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn cache_key_only_for_cacheable_methods() {
        let get = Endpoint::get("https://api.example.com", "a")
            .to_wire_request()
            .unwrap();
        assert!(get.cache_key().is_some());

        let post = Endpoint::post(
            "https://api.example.com",
            "a",
            RequestBody::raw("x", "text/plain"),
        )
        .to_wire_request()
        .unwrap();
        assert!(post.cache_key().is_none());
    }
}
