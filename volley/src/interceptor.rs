//! Middleware hooks over the wire request and the raw response.

use std::sync::Arc;

use async_trait::async_trait;
use volley_core::{Error, RequestContext, WireRequest};

use crate::transport::RawResponse;

/// A middleware hook pair.
///
/// `before_send` hooks run in registration order before dispatch;
/// `after_receive` hooks run in reverse registration order over the raw
/// response, before decoding. A hook error aborts the call with that error.
///
/// Hooks receive the context read-only; cross-cutting state belongs in the
/// context metadata, not in captured references to engine internals.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Mutate the outgoing wire request.
    async fn before_send(
        &self,
        request: &mut WireRequest,
        ctx: &RequestContext,
    ) -> Result<(), Error> {
        let _ = (request, ctx);
        Ok(())
    }

    /// Mutate the raw response before decoding.
    async fn after_receive(
        &self,
        response: &mut RawResponse,
        ctx: &RequestContext,
    ) -> Result<(), Error> {
        let _ = (response, ctx);
        Ok(())
    }
}

pub(crate) async fn run_before(
    interceptors: &[Arc<dyn Interceptor>],
    request: &mut WireRequest,
    ctx: &RequestContext,
) -> Result<(), Error> {
    for interceptor in interceptors {
        interceptor.before_send(request, ctx).await?;
    }
    Ok(())
}

pub(crate) async fn run_after(
    interceptors: &[Arc<dyn Interceptor>],
    response: &mut RawResponse,
    ctx: &RequestContext,
) -> Result<(), Error> {
    for interceptor in interceptors.iter().rev() {
        interceptor.after_receive(response, ctx).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, Method, StatusCode};
    use url::Url;

    struct Tagger(&'static str);

    #[async_trait]
    impl Interceptor for Tagger {
        async fn before_send(
            &self,
            request: &mut WireRequest,
            _ctx: &RequestContext,
        ) -> Result<(), Error> {
            let trail = request
                .headers
                .get("x-trail")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_owned();
            request.headers.insert(
                "x-trail",
                format!("{trail}{}", self.0).parse().unwrap(),
            );
            Ok(())
        }

        async fn after_receive(
            &self,
            response: &mut RawResponse,
            _ctx: &RequestContext,
        ) -> Result<(), Error> {
            let trail = response
                .headers
                .get("x-trail")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_owned();
            response.headers.insert(
                "x-trail",
                format!("{trail}{}", self.0).parse().unwrap(),
            );
            Ok(())
        }
    }

    fn wire() -> WireRequest {
        WireRequest {
            method: Method::GET,
            url: Url::parse("https://api.example.com/a").unwrap(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    fn raw() -> RawResponse {
        RawResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            url: Url::parse("https://api.example.com/a").unwrap(),
            time_to_first_byte: None,
        }
    }

    #[tokio::test]
    async fn pre_hooks_run_in_registration_order() {
        let chain: Vec<Arc<dyn Interceptor>> = vec![Arc::new(Tagger("A")), Arc::new(Tagger("B"))];
        let mut request = wire();
        let ctx = RequestContext::new();
        run_before(&chain, &mut request, &ctx).await.unwrap();
        assert_eq!(request.headers.get("x-trail").unwrap(), "AB");
    }

    #[tokio::test]
    async fn post_hooks_run_in_reverse_order() {
        let chain: Vec<Arc<dyn Interceptor>> = vec![Arc::new(Tagger("A")), Arc::new(Tagger("B"))];
        let mut response = raw();
        let ctx = RequestContext::new();
        run_after(&chain, &mut response, &ctx).await.unwrap();
        assert_eq!(response.headers.get("x-trail").unwrap(), "BA");
    }

    #[tokio::test]
    async fn empty_chain_is_the_identity() {
        let chain: Vec<Arc<dyn Interceptor>> = Vec::new();
        let mut request = wire();
        let mut response = raw();
        let ctx = RequestContext::new();
        run_before(&chain, &mut request, &ctx).await.unwrap();
        run_after(&chain, &mut response, &ctx).await.unwrap();
        assert!(request.headers.is_empty());
        assert!(response.headers.is_empty());
    }

    struct Failing;

    #[async_trait]
    impl Interceptor for Failing {
        async fn before_send(
            &self,
            _request: &mut WireRequest,
            _ctx: &RequestContext,
        ) -> Result<(), Error> {
            Err(Error::InvalidRequest("rejected by hook".into()))
        }
    }

    #[tokio::test]
    async fn hook_errors_abort_the_chain() {
        let chain: Vec<Arc<dyn Interceptor>> = vec![Arc::new(Failing), Arc::new(Tagger("A"))];
        let mut request = wire();
        let ctx = RequestContext::new();
        let err = run_before(&chain, &mut request, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert!(request.headers.get("x-trail").is_none());
    }
}
