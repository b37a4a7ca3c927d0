//! Transport seam between the engine and an HTTP client.
//!
//! The engine never talks HTTP itself; it hands a [`WireRequest`] to a
//! [`Transport`] and receives either a buffered [`RawResponse`] or a
//! [`StreamingResponse`] whose body arrives chunk by chunk. Implementations
//! must classify their failures into the [`Error`](volley_core::Error)
//! taxonomy — the retry controller and the offline path depend on it.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use url::Url;
use volley_core::{Error, WireRequest};

use crate::streaming::ByteStream;

/// A fully buffered transport response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// The complete body.
    pub body: Bytes,
    /// Final URL after any transport-level redirects.
    pub url: Url,
    /// Time from dispatch to the first response byte, when measured.
    pub time_to_first_byte: Option<Duration>,
}

/// Response head plus a lazily consumed body.
#[derive(Debug)]
pub struct StreamingResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Final URL.
    pub url: Url,
    /// The body as an async chunk source. Dropping it releases the
    /// underlying connection.
    pub body: ByteStream,
}

/// An HTTP client the engine can dispatch through.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the request and buffer the whole response body.
    async fn send(&self, request: WireRequest) -> Result<RawResponse, Error>;

    /// Perform the request and expose the body as a chunk stream.
    ///
    /// The default implementation buffers through [`Transport::send`];
    /// transports that can avoid buffering should override it.
    async fn stream(&self, request: WireRequest) -> Result<StreamingResponse, Error> {
        let response = self.send(request).await?;
        Ok(StreamingResponse {
            status: response.status,
            headers: response.headers,
            url: response.url,
            body: ByteStream::once(response.body),
        })
    }
}
