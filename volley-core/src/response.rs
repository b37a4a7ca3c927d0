//! Typed response envelope returned by the engine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use http::{HeaderMap, StatusCode};
use url::Url;
use uuid::Uuid;

/// Observability metadata attached to every response.
#[derive(Debug, Clone)]
pub struct ResponseMetadata {
    /// Id of the logical call that produced this response.
    pub request_id: Uuid,
    /// When the call entered the engine.
    pub started_at: DateTime<Utc>,
    /// When the response was fully assembled.
    pub finished_at: DateTime<Utc>,
    /// Time to first byte of the final attempt, when the transport measured it.
    pub time_to_first_byte: Option<Duration>,
    /// Decoded payload size in bytes.
    pub size_bytes: u64,
    /// Whether the payload was served from the cache without a network attempt.
    pub from_cache: bool,
    /// Retries consumed against the retry policy.
    pub retry_count: u32,
}

/// A decoded response with its wire-level envelope.
#[derive(Debug, Clone)]
pub struct Response<T> {
    payload: T,
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    metadata: ResponseMetadata,
}

impl<T> Response<T> {
    /// Assemble a response.
    pub fn new(
        payload: T,
        status: StatusCode,
        headers: HeaderMap,
        url: Url,
        metadata: ResponseMetadata,
    ) -> Self {
        Response {
            payload,
            status,
            headers,
            url,
            metadata,
        }
    }

    /// The decoded payload.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Consume the response, keeping the payload.
    pub fn into_payload(self) -> T {
        self.payload
    }

    /// The response status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The final request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Observability metadata.
    pub fn metadata(&self) -> &ResponseMetadata {
        &self.metadata
    }

    /// Status in `[200, 300)`.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Status in `[400, 500)`.
    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    /// Status in `[500, 600)`.
    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Map the payload, keeping the envelope.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            payload: f(self.payload),
            status: self.status,
            headers: self.headers,
            url: self.url,
            metadata: self.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> ResponseMetadata {
        ResponseMetadata {
            request_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            time_to_first_byte: None,
            size_bytes: 2,
            from_cache: false,
            retry_count: 0,
        }
    }

    #[test]
    fn status_predicates() {
        let url = Url::parse("https://api.example.com/users/1").unwrap();
        let ok = Response::new((), StatusCode::OK, HeaderMap::new(), url.clone(), metadata());
        assert!(ok.is_success());
        assert!(!ok.is_client_error());

        let not_found = Response::new(
            (),
            StatusCode::NOT_FOUND,
            HeaderMap::new(),
            url.clone(),
            metadata(),
        );
        assert!(not_found.is_client_error());

        let unavailable = Response::new(
            (),
            StatusCode::SERVICE_UNAVAILABLE,
            HeaderMap::new(),
            url,
            metadata(),
        );
        assert!(unavailable.is_server_error());
    }

    #[test]
    fn map_preserves_envelope() {
        let url = Url::parse("https://api.example.com/n").unwrap();
        let response = Response::new(21u32, StatusCode::OK, HeaderMap::new(), url, metadata());
        let doubled = response.map(|n| n * 2);
        assert_eq!(*doubled.payload(), 42);
        assert_eq!(doubled.status(), StatusCode::OK);
    }
}
