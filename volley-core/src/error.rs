//! The closed error taxonomy shared by every layer of the engine.
//!
//! Transport implementations, the cache, the authenticator and the offline
//! queue all classify their failures into [`Error`] before the engine sees
//! them. The classification predicates ([`Error::is_connectivity`],
//! [`Error::is_recoverable`], [`Error::is_auth`]) are what the retry
//! controller and the offline path key their decisions on, so new call sites
//! should never match on raw variants when a predicate exists.

use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use thiserror::Error;

/// Error type covering the whole request lifecycle.
///
/// The taxonomy is closed: transports and codecs must map their own error
/// types onto these variants instead of leaking them through an opaque
/// wrapper. The terminal cause of an exhausted retry loop is preserved inside
/// [`Error::RetriesExhausted`].
#[derive(Debug, Error)]
pub enum Error {
    // Request shape. Terminal.
    /// URL composition produced a malformed or relative URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The request description could not be turned into a wire request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request body encoder failed.
    #[error("body encoding failed: {0}")]
    EncodingFailed(String),

    // Response shape. Terminal.
    /// The transport completed without producing a response.
    #[error("no response received")]
    NoResponse,

    /// A response arrived with an empty body where one was required.
    #[error("response carried no data")]
    NoData,

    /// The codec could not decode the response payload.
    #[error("response decoding failed: {0}")]
    DecodingFailed(String),

    /// The response was structurally unusable (e.g. a 1xx/3xx the transport
    /// should have consumed).
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    // HTTP status classes.
    /// A 4xx status other than the ones with dedicated variants.
    #[error("client error {status}")]
    ClientError {
        /// The response status code.
        status: u16,
        /// The raw response body.
        body: Bytes,
    },

    /// A 5xx status.
    #[error("server error {status}")]
    ServerError {
        /// The response status code.
        status: u16,
        /// The raw response body.
        body: Bytes,
    },

    /// HTTP 401.
    #[error("unauthorized")]
    Unauthorized,

    /// HTTP 403.
    #[error("forbidden")]
    Forbidden,

    /// HTTP 404.
    #[error("not found")]
    NotFound,

    /// HTTP 429, with the parsed `Retry-After` value when the server sent one.
    #[error("rate limited")]
    RateLimited {
        /// Server-requested wait before the next attempt.
        retry_after: Option<Duration>,
    },

    // Connectivity. Retry-eligible by default.
    /// No route to the network at all.
    #[error("no network connection")]
    NoConnection,

    /// The attempt exceeded its timeout.
    #[error("request timed out")]
    Timeout,

    /// TLS negotiation failed.
    #[error("tls handshake failed: {0}")]
    Tls(String),

    /// Hostname resolution failed.
    #[error("dns resolution failed: {0}")]
    Dns(String),

    /// The remote end refused the connection.
    #[error("connection refused")]
    ConnectionRefused,

    /// The connection was reset mid-flight.
    #[error("connection reset by peer")]
    ConnectionReset,

    // Authentication.
    /// The endpoint requires credentials and none are configured.
    #[error("authentication required")]
    AuthenticationRequired,

    /// The access token is past its expiry and no refresh path exists.
    #[error("access token expired")]
    TokenExpired,

    /// A token refresh was attempted and failed.
    #[error("token refresh failed: {0}")]
    TokenRefreshFailed(String),

    // Cache.
    /// The key is not present in the cache.
    #[error("cache miss")]
    CacheMiss,

    /// The cached entry exists but is past its TTL.
    #[error("cache entry expired")]
    CacheExpired,

    /// A cache write could not be committed.
    #[error("cache write failed: {0}")]
    CacheWriteFailed(String),

    // Offline queue.
    /// The offline queue is at capacity.
    #[error("offline queue is full")]
    QueueFull,

    // Control flow.
    /// All permitted attempts failed; the terminal cause is preserved.
    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// Number of attempts performed.
        attempts: u32,
        /// The classified error of the final attempt.
        #[source]
        source: Box<Error>,
    },

    /// The circuit breaker is open and refused the call.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The caller abandoned the call.
    #[error("call cancelled")]
    Cancelled,

    /// Anything that escaped classification.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl Error {
    /// Classify a non-2xx status code into the taxonomy.
    ///
    /// `retry_after` carries the parsed `Retry-After` header for 429
    /// responses; it is ignored for every other status.
    pub fn from_status(status: StatusCode, body: Bytes, retry_after: Option<Duration>) -> Self {
        match status.as_u16() {
            401 => Error::Unauthorized,
            403 => Error::Forbidden,
            404 => Error::NotFound,
            429 => Error::RateLimited { retry_after },
            code @ 400..=499 => Error::ClientError { status: code, body },
            code @ 500..=599 => Error::ServerError { status: code, body },
            code => Error::InvalidResponse(format!("unexpected status {code}")),
        }
    }

    /// The HTTP status this error corresponds to, when it has one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::ClientError { status, .. } | Error::ServerError { status, .. } => Some(*status),
            Error::Unauthorized => Some(401),
            Error::Forbidden => Some(403),
            Error::NotFound => Some(404),
            Error::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// True for failures caused by the network path rather than either peer.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Error::NoConnection
                | Error::Timeout
                | Error::Tls(_)
                | Error::Dns(_)
                | Error::ConnectionRefused
                | Error::ConnectionReset
        )
    }

    /// True for failures in the credential lifecycle.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Error::Unauthorized
                | Error::AuthenticationRequired
                | Error::TokenExpired
                | Error::TokenRefreshFailed(_)
        )
    }

    /// True when another attempt could plausibly succeed.
    ///
    /// This is the broadest recoverability signal; the retry policy narrows
    /// it further with per-category switches and status-code sets.
    pub fn is_recoverable(&self) -> bool {
        match self {
            e if e.is_connectivity() => true,
            Error::ServerError { .. } | Error::RateLimited { .. } => true,
            Error::ClientError { status, .. } => *status == 408,
            _ => false,
        }
    }

    /// The server-requested delay, for rate-limited failures.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// The terminal cause, unwrapping [`Error::RetriesExhausted`].
    pub fn terminal_cause(&self) -> &Error {
        match self {
            Error::RetriesExhausted { source, .. } => source.terminal_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_uses_dedicated_variants() {
        let body = Bytes::new();
        assert!(matches!(
            Error::from_status(StatusCode::UNAUTHORIZED, body.clone(), None),
            Error::Unauthorized
        ));
        assert!(matches!(
            Error::from_status(StatusCode::NOT_FOUND, body.clone(), None),
            Error::NotFound
        ));
        assert!(matches!(
            Error::from_status(StatusCode::TOO_MANY_REQUESTS, body.clone(), None),
            Error::RateLimited { .. }
        ));
        assert!(matches!(
            Error::from_status(StatusCode::BAD_GATEWAY, body, None),
            Error::ServerError { status: 502, .. }
        ));
    }

    #[test]
    fn connectivity_errors_are_recoverable() {
        for e in [
            Error::NoConnection,
            Error::Timeout,
            Error::ConnectionRefused,
            Error::ConnectionReset,
            Error::Dns("nxdomain".into()),
            Error::Tls("handshake".into()),
        ] {
            assert!(e.is_connectivity(), "{e}");
            assert!(e.is_recoverable(), "{e}");
        }
    }

    #[test]
    fn auth_and_decode_errors_are_terminal() {
        assert!(!Error::Unauthorized.is_recoverable());
        assert!(!Error::DecodingFailed("bad json".into()).is_recoverable());
        assert!(!Error::Forbidden.is_recoverable());
        assert!(Error::Unauthorized.is_auth());
    }

    #[test]
    fn request_timeout_client_error_is_recoverable() {
        let e = Error::ClientError {
            status: 408,
            body: Bytes::new(),
        };
        assert!(e.is_recoverable());
        let e = Error::ClientError {
            status: 422,
            body: Bytes::new(),
        };
        assert!(!e.is_recoverable());
    }

    #[test]
    fn terminal_cause_unwraps_nested_exhaustion() {
        let inner = Error::ServerError {
            status: 503,
            body: Bytes::new(),
        };
        let wrapped = Error::RetriesExhausted {
            attempts: 3,
            source: Box::new(inner),
        };
        assert_eq!(wrapped.terminal_cause().status(), Some(503));
    }
}
