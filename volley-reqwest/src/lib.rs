//! Reqwest-backed [`Transport`] for the volley request-execution engine.
//!
//! ```no_run
//! use std::sync::Arc;
//! use volley::RequestEngine;
//! use volley_reqwest::ReqwestTransport;
//!
//! let engine = RequestEngine::builder(Arc::new(ReqwestTransport::new())).build();
//! # let _ = engine;
//! ```
//!
//! Transport failures are classified into the engine's error taxonomy before
//! they leave this crate, so retry and offline decisions work the same with
//! any transport.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

use std::io::ErrorKind;

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::time::Instant;
use volley::streaming::ByteStream;
use volley::transport::{RawResponse, StreamingResponse, Transport};
use volley_core::{Error, WireRequest};

/// [`Transport`] implementation over a shared [`reqwest::Client`].
///
/// The client's connection pool is reused across calls; per-request timeouts
/// from the wire request override the client-level timeout.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// A transport over a default client.
    pub fn new() -> Self {
        ReqwestTransport {
            client: reqwest::Client::new(),
        }
    }

    /// A transport over a preconfigured client (pinning, proxies, pools).
    pub fn with_client(client: reqwest::Client) -> Self {
        ReqwestTransport { client }
    }

    async fn dispatch(&self, request: WireRequest) -> Result<reqwest::Response, Error> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        builder.send().await.map_err(classify)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: WireRequest) -> Result<RawResponse, Error> {
        let dispatched = Instant::now();
        let response = self.dispatch(request).await?;
        let time_to_first_byte = dispatched.elapsed();

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await.map_err(classify)?;

        Ok(RawResponse {
            status,
            headers,
            body,
            url,
            time_to_first_byte: Some(time_to_first_byte),
        })
    }

    async fn stream(&self, request: WireRequest) -> Result<StreamingResponse, Error> {
        let response = self.dispatch(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let chunks = response.bytes_stream().map_err(classify);

        Ok(StreamingResponse {
            status,
            headers,
            url,
            body: ByteStream::new(chunks),
        })
    }
}

/// Map a [`reqwest::Error`] onto the engine taxonomy.
///
/// Connect failures are resolved against the io error in the source chain
/// where possible; TLS and DNS failures are recognized by their messages
/// because reqwest does not expose them structurally.
pub fn classify(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        return Error::Timeout;
    }
    if error.is_builder() {
        return Error::InvalidRequest(error.to_string());
    }
    if error.is_decode() || error.is_body() {
        return Error::InvalidResponse(error.to_string());
    }

    let mut source = std::error::Error::source(&error);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            match io.kind() {
                ErrorKind::ConnectionRefused => return Error::ConnectionRefused,
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                    return Error::ConnectionReset;
                }
                ErrorKind::NotConnected | ErrorKind::NetworkUnreachable => {
                    return Error::NoConnection;
                }
                ErrorKind::TimedOut => return Error::Timeout,
                _ => {}
            }
        }
        let text = inner.to_string().to_ascii_lowercase();
        if text.contains("dns") || text.contains("failed to lookup") {
            return Error::Dns(inner.to_string());
        }
        if text.contains("certificate") || text.contains("tls") || text.contains("ssl") {
            return Error::Tls(inner.to_string());
        }
        source = inner.source();
    }

    if error.is_connect() {
        // Connect failure with no recognizable source: assume the peer was
        // unreachable rather than inventing a new category.
        return Error::ConnectionRefused;
    }
    tracing::debug!(%error, "unclassified transport error");
    Error::Unknown(error.to_string())
}
