//! Credential attachment and refresh.
//!
//! Each scheme implements [`Authenticator`]; the engine calls
//! [`authenticate`](Authenticator::authenticate) before dispatch when an
//! endpoint requires it, and [`refresh`](Authenticator::refresh) once on a
//! 401. Token-bearing schemes refresh through a single-flight gate: however
//! many callers observe an expired token at once, exactly one refresh runs
//! and everyone shares its outcome.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderName, HeaderValue, Method};
use serde::Deserialize;
use tokio::sync::broadcast;
use url::Url;
use volley_core::{Error, WireRequest};

use crate::transport::Transport;

/// A credential scheme the engine can drive.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Attach credentials to an outgoing request, refreshing first if the
    /// current token is past its expiry.
    async fn authenticate(&self, request: &mut WireRequest) -> Result<(), Error>;

    /// Obtain fresh credentials. Concurrent calls coalesce into one refresh.
    async fn refresh(&self) -> Result<(), Error>;

    /// Whether usable credentials are currently held.
    async fn is_valid(&self) -> bool;

    /// Drop all credentials. Idempotent.
    async fn logout(&self);
}

/// An access token with its refresh companion and expiry.
#[derive(Debug, Clone)]
pub struct TokenSet {
    /// The bearer access token.
    pub access_token: String,
    /// Token presented to the refresh endpoint, when the scheme has one.
    pub refresh_token: Option<String>,
    /// Absolute expiry; `None` means the token never expires locally.
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    /// A token without expiry or refresh companion.
    pub fn new(access_token: impl Into<String>) -> Self {
        TokenSet {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    /// Set the refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Expire the token `ttl` from now.
    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_at = Utc::now().checked_add_signed(
            chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        );
        self
    }

    /// Whether the token is past its expiry.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Utc::now() >= deadline)
    }
}

/// User-supplied refresh handler for [`BearerAuthenticator`].
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange the current refresh token for a fresh token set.
    async fn refresh(&self, refresh_token: Option<&str>) -> Result<TokenSet, Error>;
}

/// Coalesces concurrent refresh attempts into one in-flight operation.
///
/// The first caller becomes the leader and runs the operation; everyone else
/// subscribes to a broadcast channel and shares the outcome. The in-flight
/// slot is cleared before the result is broadcast, and a dropped leader
/// closes the channel so waiters fail instead of hanging.
struct SingleFlight {
    slot: Mutex<Option<broadcast::Sender<Result<(), String>>>>,
}

enum Role {
    Lead(broadcast::Sender<Result<(), String>>),
    Wait(broadcast::Receiver<Result<(), String>>),
}

impl SingleFlight {
    fn new() -> Self {
        SingleFlight {
            slot: Mutex::new(None),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<broadcast::Sender<Result<(), String>>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run<F, Fut>(&self, operation: F) -> Result<(), Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), Error>>,
    {
        let role = {
            let mut slot = self.lock();
            match &*slot {
                Some(sender) => Role::Wait(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    *slot = Some(sender.clone());
                    Role::Lead(sender)
                }
            }
        };

        match role {
            Role::Wait(mut receiver) => match receiver.recv().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(message)) => Err(Error::TokenRefreshFailed(message)),
                Err(_) => Err(Error::TokenRefreshFailed("refresh abandoned".into())),
            },
            Role::Lead(sender) => {
                let guard = ClearOnDrop { flight: self };
                let result = operation().await;
                // Clear the slot before broadcasting so late arrivals start a
                // fresh refresh instead of waiting on a finished one.
                self.lock().take();
                let _ = sender.send(result.as_ref().map(|_| ()).map_err(|e| e.to_string()));
                drop(guard);
                result
            }
        }
    }
}

struct ClearOnDrop<'a> {
    flight: &'a SingleFlight,
}

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.flight.lock().take();
    }
}

fn bearer_header(token: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| Error::InvalidRequest(e.to_string()))
}

/// `Authorization: Bearer <token>` with an optional refresh handler.
pub struct BearerAuthenticator {
    tokens: Mutex<Option<TokenSet>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    flight: SingleFlight,
}

impl BearerAuthenticator {
    /// A bearer scheme with a static token.
    pub fn new(tokens: TokenSet) -> Self {
        BearerAuthenticator {
            tokens: Mutex::new(Some(tokens)),
            refresher: None,
            flight: SingleFlight::new(),
        }
    }

    /// A bearer scheme that can refresh through `refresher`.
    pub fn with_refresher(tokens: TokenSet, refresher: Arc<dyn TokenRefresher>) -> Self {
        BearerAuthenticator {
            tokens: Mutex::new(Some(tokens)),
            refresher: Some(refresher),
            flight: SingleFlight::new(),
        }
    }

    fn current(&self) -> Option<TokenSet> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, tokens: Option<TokenSet>) {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = tokens;
    }
}

#[async_trait]
impl Authenticator for BearerAuthenticator {
    async fn authenticate(&self, request: &mut WireRequest) -> Result<(), Error> {
        let tokens = self.current().ok_or(Error::AuthenticationRequired)?;
        let tokens = if tokens.is_expired() {
            if self.refresher.is_none() {
                return Err(Error::TokenExpired);
            }
            self.refresh().await?;
            self.current().ok_or(Error::AuthenticationRequired)?
        } else {
            tokens
        };
        request
            .headers
            .insert(AUTHORIZATION, bearer_header(&tokens.access_token)?);
        Ok(())
    }

    async fn refresh(&self) -> Result<(), Error> {
        let Some(refresher) = self.refresher.clone() else {
            return Err(Error::TokenRefreshFailed(
                "no refresh handler configured".into(),
            ));
        };
        self.flight
            .run(|| async move {
                let refresh_token =
                    self.current().and_then(|t| t.refresh_token);
                let fresh = refresher
                    .refresh(refresh_token.as_deref())
                    .await
                    .map_err(|e| match e {
                        Error::TokenRefreshFailed(_) => e,
                        other => Error::TokenRefreshFailed(other.to_string()),
                    })?;
                tracing::debug!("bearer token refreshed");
                self.store(Some(fresh));
                Ok(())
            })
            .await
    }

    async fn is_valid(&self) -> bool {
        self.current().is_some_and(|t| !t.is_expired())
    }

    async fn logout(&self) {
        self.store(None);
    }
}

/// A fixed key in a configurable header, with an optional value prefix.
pub struct ApiKeyAuthenticator {
    header: HeaderName,
    prefix: Option<String>,
    key: Mutex<Option<String>>,
}

impl ApiKeyAuthenticator {
    /// A scheme writing `key` into `header`.
    pub fn new(header: HeaderName, key: impl Into<String>) -> Self {
        ApiKeyAuthenticator {
            header,
            prefix: None,
            key: Mutex::new(Some(key.into())),
        }
    }

    /// Prepend `prefix` (plus a space) to the header value.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, request: &mut WireRequest) -> Result<(), Error> {
        let key = self
            .key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::AuthenticationRequired)?;
        let value = match &self.prefix {
            Some(prefix) => format!("{prefix} {key}"),
            None => key,
        };
        request.headers.insert(
            self.header.clone(),
            HeaderValue::from_str(&value).map_err(|e| Error::InvalidRequest(e.to_string()))?,
        );
        Ok(())
    }

    async fn refresh(&self) -> Result<(), Error> {
        // Static keys have nothing to refresh.
        Ok(())
    }

    async fn is_valid(&self) -> bool {
        self.key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    async fn logout(&self) {
        self.key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// `Authorization: Basic base64(user:password)`.
pub struct BasicAuthenticator {
    credentials: Mutex<Option<(String, String)>>,
}

impl BasicAuthenticator {
    /// A scheme for the given user and password.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        BasicAuthenticator {
            credentials: Mutex::new(Some((user.into(), password.into()))),
        }
    }
}

#[async_trait]
impl Authenticator for BasicAuthenticator {
    async fn authenticate(&self, request: &mut WireRequest) -> Result<(), Error> {
        let (user, password) = self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::AuthenticationRequired)?;
        let encoded = BASE64.encode(format!("{user}:{password}"));
        request.headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}"))
                .map_err(|e| Error::InvalidRequest(e.to_string()))?,
        );
        Ok(())
    }

    async fn refresh(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn is_valid(&self) -> bool {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    async fn logout(&self) {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Client settings for [`OAuth2Authenticator`].
#[derive(Debug, Clone)]
pub struct OAuth2Config {
    /// OAuth2 client id.
    pub client_id: String,
    /// Client secret for confidential clients.
    pub client_secret: Option<String>,
    /// Token endpoint refresh requests are posted to.
    pub token_endpoint: Url,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Redirect URI used by the authorization flow, carried for completeness.
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// OAuth2 bearer tokens refreshed against a token endpoint.
///
/// Refreshes POST `application/x-www-form-urlencoded` bodies
/// (`grant_type=refresh_token&…`) through the supplied transport, so the
/// scheme works with whatever HTTP client the engine uses.
pub struct OAuth2Authenticator {
    config: OAuth2Config,
    transport: Arc<dyn Transport>,
    tokens: Mutex<Option<TokenSet>>,
    flight: SingleFlight,
}

impl OAuth2Authenticator {
    /// A scheme seeded with tokens from a completed authorization flow.
    pub fn new(config: OAuth2Config, transport: Arc<dyn Transport>, tokens: TokenSet) -> Self {
        OAuth2Authenticator {
            config,
            transport,
            tokens: Mutex::new(Some(tokens)),
            flight: SingleFlight::new(),
        }
    }

    fn current(&self) -> Option<TokenSet> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, tokens: Option<TokenSet>) {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = tokens;
    }

    fn refresh_request(&self, refresh_token: &str) -> Result<WireRequest, Error> {
        let mut form = vec![
            ("grant_type".to_owned(), "refresh_token".to_owned()),
            ("refresh_token".to_owned(), refresh_token.to_owned()),
            ("client_id".to_owned(), self.config.client_id.clone()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret".to_owned(), secret.clone()));
        }
        let body = serde_urlencoded::to_string(&form)
            .map_err(|e| Error::TokenRefreshFailed(e.to_string()))?;

        let mut headers = http::HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        Ok(WireRequest {
            method: Method::POST,
            url: self.config.token_endpoint.clone(),
            headers,
            body: Some(Bytes::from(body)),
            timeout: None,
        })
    }
}

#[async_trait]
impl Authenticator for OAuth2Authenticator {
    async fn authenticate(&self, request: &mut WireRequest) -> Result<(), Error> {
        let tokens = self.current().ok_or(Error::AuthenticationRequired)?;
        let tokens = if tokens.is_expired() {
            self.refresh().await?;
            self.current().ok_or(Error::AuthenticationRequired)?
        } else {
            tokens
        };
        request
            .headers
            .insert(AUTHORIZATION, bearer_header(&tokens.access_token)?);
        Ok(())
    }

    async fn refresh(&self) -> Result<(), Error> {
        self.flight
            .run(|| async move {
                let refresh_token = self
                    .current()
                    .and_then(|t| t.refresh_token)
                    .ok_or_else(|| {
                        Error::TokenRefreshFailed("no refresh token held".into())
                    })?;
                let request = self.refresh_request(&refresh_token)?;
                let response = self
                    .transport
                    .send(request)
                    .await
                    .map_err(|e| Error::TokenRefreshFailed(e.to_string()))?;
                if !response.status.is_success() {
                    return Err(Error::TokenRefreshFailed(format!(
                        "token endpoint returned {}",
                        response.status
                    )));
                }
                let parsed: TokenEndpointResponse = serde_json::from_slice(&response.body)
                    .map_err(|e| Error::TokenRefreshFailed(e.to_string()))?;
                let fresh = TokenSet {
                    access_token: parsed.access_token,
                    // Servers may rotate the refresh token or keep it.
                    refresh_token: parsed.refresh_token.or(Some(refresh_token)),
                    expires_at: parsed.expires_in.and_then(|secs| {
                        Utc::now().checked_add_signed(chrono::Duration::seconds(secs as i64))
                    }),
                };
                tracing::debug!("oauth2 tokens refreshed");
                self.store(Some(fresh));
                Ok(())
            })
            .await
    }

    async fn is_valid(&self) -> bool {
        self.current().is_some_and(|t| !t.is_expired())
    }

    async fn logout(&self) {
        self.store(None);
    }
}
