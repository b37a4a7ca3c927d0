//! Authenticator scheme behaviour, including single-flight refresh.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::HeaderName;
use http::{HeaderMap, Method, StatusCode};
use url::Url;
use volley::{
    ApiKeyAuthenticator, Authenticator, BasicAuthenticator, BearerAuthenticator,
    Error, OAuth2Authenticator, OAuth2Config, RawResponse, TokenRefresher, TokenSet, Transport,
    WireRequest,
};

fn wire() -> WireRequest {
    WireRequest {
        method: Method::GET,
        url: Url::parse("https://api.example.com/me").unwrap(),
        headers: HeaderMap::new(),
        body: None,
        timeout: None,
    }
}

struct SlowRefresher {
    calls: AtomicUsize,
    fail: bool,
}

impl SlowRefresher {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(SlowRefresher {
            calls: AtomicUsize::new(0),
            fail,
        })
    }
}

#[async_trait]
impl TokenRefresher for SlowRefresher {
    async fn refresh(&self, refresh_token: Option<&str>) -> Result<TokenSet, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        if self.fail {
            return Err(Error::TokenRefreshFailed("refresh endpoint said no".into()));
        }
        assert_eq!(refresh_token, Some("r1"));
        Ok(TokenSet::new("fresh")
            .with_refresh_token("r2")
            .expires_in(Duration::from_secs(3600)))
    }
}

fn expired_tokens() -> TokenSet {
    TokenSet {
        access_token: "stale".into(),
        refresh_token: Some("r1".into()),
        expires_at: Some(chrono::Utc::now() - chrono::Duration::seconds(60)),
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_authenticate_calls_share_one_refresh() {
    let refresher = SlowRefresher::new(false);
    let auth = Arc::new(BearerAuthenticator::with_refresher(
        expired_tokens(),
        refresher.clone(),
    ));

    let tasks = (0..10).map(|_| {
        let auth = auth.clone();
        async move {
            let mut request = wire();
            auth.authenticate(&mut request).await.unwrap();
            request
                .headers
                .get("authorization")
                .unwrap()
                .to_str()
                .unwrap()
                .to_owned()
        }
    });
    let headers = futures::future::join_all(tasks).await;

    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    assert!(headers.iter().all(|h| h == "Bearer fresh"));
    assert!(auth.is_valid().await);
}

#[tokio::test(start_paused = true)]
async fn refresh_failure_is_shared_by_all_waiters() {
    let refresher = SlowRefresher::new(true);
    let auth = Arc::new(BearerAuthenticator::with_refresher(
        expired_tokens(),
        refresher.clone(),
    ));

    let tasks = (0..5).map(|_| {
        let auth = auth.clone();
        async move {
            let mut request = wire();
            auth.authenticate(&mut request).await
        }
    });
    let results = futures::future::join_all(tasks).await;

    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    assert!(results
        .iter()
        .all(|r| matches!(r, Err(Error::TokenRefreshFailed(_)))));
}

#[tokio::test]
async fn bearer_without_refresher_cannot_recover_from_expiry() {
    let auth = BearerAuthenticator::new(expired_tokens());
    let mut request = wire();
    let err = auth.authenticate(&mut request).await.unwrap_err();
    assert!(matches!(err, Error::TokenExpired));
    assert!(!auth.is_valid().await);
}

#[tokio::test]
async fn logout_is_idempotent() {
    let auth = BearerAuthenticator::new(TokenSet::new("t"));
    assert!(auth.is_valid().await);
    auth.logout().await;
    auth.logout().await;
    assert!(!auth.is_valid().await);

    let mut request = wire();
    assert!(matches!(
        auth.authenticate(&mut request).await.unwrap_err(),
        Error::AuthenticationRequired
    ));
}

#[tokio::test]
async fn basic_scheme_encodes_credentials() {
    let auth = BasicAuthenticator::new("user", "pass");
    let mut request = wire();
    auth.authenticate(&mut request).await.unwrap();
    assert_eq!(
        request.headers.get("authorization").unwrap(),
        "Basic dXNlcjpwYXNz"
    );

    auth.logout().await;
    auth.logout().await;
    assert!(!auth.is_valid().await);
}

#[tokio::test]
async fn api_key_scheme_writes_the_configured_header() {
    let auth = ApiKeyAuthenticator::new(HeaderName::from_static("x-api-key"), "secret")
        .with_prefix("Key");
    let mut request = wire();
    auth.authenticate(&mut request).await.unwrap();
    assert_eq!(request.headers.get("x-api-key").unwrap(), "Key secret");

    auth.logout().await;
    assert!(!auth.is_valid().await);
    let mut request = wire();
    assert!(auth.authenticate(&mut request).await.is_err());
}

/// Transport stub for the OAuth2 token endpoint.
struct TokenEndpoint {
    responses: Mutex<VecDeque<RawResponse>>,
    requests: Mutex<Vec<WireRequest>>,
}

impl TokenEndpoint {
    fn new() -> Arc<Self> {
        Arc::new(TokenEndpoint {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn push(&self, status: u16, body: &str) {
        self.responses.lock().unwrap().push_back(RawResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::from(body.to_owned()),
            url: Url::parse("https://auth.example.com/token").unwrap(),
            time_to_first_byte: None,
        });
    }
}

#[async_trait]
impl Transport for TokenEndpoint {
    async fn send(&self, request: WireRequest) -> Result<RawResponse, Error> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Unknown("no scripted token response".into()))
    }
}

fn oauth2_config() -> OAuth2Config {
    OAuth2Config {
        client_id: "cid".into(),
        client_secret: Some("shh".into()),
        token_endpoint: Url::parse("https://auth.example.com/token").unwrap(),
        scopes: vec!["read".into()],
        redirect_uri: None,
    }
}

#[tokio::test]
async fn oauth2_refresh_posts_the_grant_and_rotates_tokens() {
    let endpoint = TokenEndpoint::new();
    endpoint.push(200, r#"{"access_token":"B","expires_in":3600}"#);
    let auth = OAuth2Authenticator::new(oauth2_config(), endpoint.clone(), expired_tokens());

    let mut request = wire();
    auth.authenticate(&mut request).await.unwrap();
    assert_eq!(request.headers.get("authorization").unwrap(), "Bearer B");

    let sent = endpoint.requests.lock().unwrap()[0].clone();
    assert_eq!(sent.method, Method::POST);
    assert_eq!(sent.url.as_str(), "https://auth.example.com/token");
    assert_eq!(
        sent.headers.get("content-type").unwrap(),
        "application/x-www-form-urlencoded"
    );
    let body = String::from_utf8(sent.body.unwrap().to_vec()).unwrap();
    assert!(body.contains("grant_type=refresh_token"));
    assert!(body.contains("refresh_token=r1"));
    assert!(body.contains("client_id=cid"));
    assert!(body.contains("client_secret=shh"));

    // The server kept the refresh token; the old one is retained locally.
    assert!(auth.is_valid().await);
}

#[tokio::test]
async fn oauth2_refresh_failure_is_classified() {
    let endpoint = TokenEndpoint::new();
    endpoint.push(400, r#"{"error":"invalid_grant"}"#);
    let auth = OAuth2Authenticator::new(oauth2_config(), endpoint, expired_tokens());

    let mut request = wire();
    let err = auth.authenticate(&mut request).await.unwrap_err();
    assert!(matches!(err, Error::TokenRefreshFailed(_)));
}

#[tokio::test]
async fn oauth2_logout_drops_tokens() {
    let endpoint = TokenEndpoint::new();
    let auth = OAuth2Authenticator::new(
        oauth2_config(),
        endpoint,
        TokenSet::new("live").expires_in(Duration::from_secs(3600)),
    );
    assert!(auth.is_valid().await);
    auth.logout().await;
    auth.logout().await;
    assert!(!auth.is_valid().await);
}
