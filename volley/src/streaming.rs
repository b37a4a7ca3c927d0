//! Byte-chunk streams for SSE/WebSocket-style consumption and progress
//! reporting.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode};
use pin_project::pin_project;
use std::sync::Arc;
use volley_core::Error;

/// Progress callback invoked with cumulative transferred bytes.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// A pull-based source of body chunks.
///
/// The stream owns whatever transport resources feed it; dropping it cancels
/// the transfer and closes the connection.
pub struct ByteStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>,
}

impl ByteStream {
    /// Wrap any chunk stream.
    pub fn new(stream: impl Stream<Item = Result<Bytes, Error>> + Send + 'static) -> Self {
        ByteStream {
            inner: Box::pin(stream),
        }
    }

    /// A stream yielding one already-buffered chunk.
    pub fn once(bytes: Bytes) -> Self {
        ByteStream::new(futures::stream::iter([Ok(bytes)]))
    }

    /// Drain the stream into one buffer.
    pub async fn collect(mut self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.inner.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for ByteStream {
    type Item = Result<Bytes, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ByteStream")
    }
}

/// Stream adapter that reports cumulative transferred bytes after each chunk.
#[pin_project]
pub struct ProgressStream<S> {
    #[pin]
    inner: S,
    transferred: u64,
    on_progress: ProgressFn,
}

impl<S> ProgressStream<S> {
    /// Wrap `inner`, invoking `on_progress` after every chunk.
    pub fn new(inner: S, on_progress: ProgressFn) -> Self {
        ProgressStream {
            inner,
            transferred: 0,
            on_progress,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, Error>>,
{
    type Item = Result<Bytes, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                *this.transferred += chunk.len() as u64;
                (this.on_progress)(*this.transferred);
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

/// Validate a streaming response head before handing the body out.
///
/// The status must be 2xx; when `expected_content_type` is given (e.g.
/// `text/event-stream` for SSE), the response `Content-Type` must match it
/// by prefix so parameters like `charset` do not fail the check.
pub fn ensure_streamable(
    status: StatusCode,
    headers: &HeaderMap,
    expected_content_type: Option<&str>,
) -> Result<(), Error> {
    if !status.is_success() {
        return Err(Error::from_status(status, Bytes::new(), None));
    }
    if let Some(expected) = expected_content_type {
        let actual = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !actual.starts_with(expected) {
            return Err(Error::InvalidResponse(format!(
                "expected content type {expected}, got {actual}"
            )));
        }
    }
    Ok(())
}
