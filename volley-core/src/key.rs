//! Cache key construction.
//!
//! A key is `(URL, method, body-hash)`: two requests that would put identical
//! bytes on the wire share a key, differing bodies do not. Keys exist only
//! for cacheable methods (GET/HEAD); everything else is never keyed.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use http::Method;
use url::Url;

use crate::endpoint::MethodExt;

#[derive(Debug, Eq, PartialEq, Hash)]
struct CacheKeyInner {
    method: Method,
    url: String,
    body_hash: Option<String>,
}

/// Identity of a cached response.
///
/// Wraps its data in [`Arc`], so cloning is an O(1) reference-count bump;
/// keys travel through every cache tier and the engine loop.
#[derive(Clone, Debug)]
pub struct CacheKey {
    inner: Arc<CacheKeyInner>,
}

impl CacheKey {
    /// Build the key for a wire request, or `None` for non-cacheable methods.
    pub fn for_request(method: &Method, url: &Url, body: Option<&[u8]>) -> Option<Self> {
        if !method.is_cacheable() {
            return None;
        }
        Some(CacheKey {
            inner: Arc::new(CacheKeyInner {
                method: method.clone(),
                url: url.to_string(),
                body_hash: body.map(|b| hex::encode(blake3::hash(b).as_bytes())),
            }),
        })
    }

    /// The GET key for a URL, used for point invalidation after mutations.
    pub fn for_get(url: &Url) -> Self {
        CacheKey {
            inner: Arc::new(CacheKeyInner {
                method: Method::GET,
                url: url.to_string(),
                body_hash: None,
            }),
        }
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    /// The absolute URL, query included.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Hex digest of the request body, when one was keyed.
    pub fn body_hash(&self) -> Option<&str> {
        self.inner.body_hash.as_deref()
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.inner.method, self.inner.url)?;
        if let Some(hash) = &self.inner.body_hash {
            write!(f, "#{hash}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn non_cacheable_methods_are_never_keyed() {
        let u = url("https://api.example.com/users");
        assert!(CacheKey::for_request(&Method::POST, &u, None).is_none());
        assert!(CacheKey::for_request(&Method::DELETE, &u, None).is_none());
        assert!(CacheKey::for_request(&Method::GET, &u, None).is_some());
        assert!(CacheKey::for_request(&Method::HEAD, &u, None).is_some());
    }

    #[test]
    fn identical_wire_bytes_collide() {
        let u = url("https://api.example.com/search");
        let a = CacheKey::for_request(&Method::GET, &u, Some(b"q=1")).unwrap();
        let b = CacheKey::for_request(&Method::GET, &u, Some(b"q=1")).unwrap();
        let c = CacheKey::for_request(&Method::GET, &u, Some(b"q=2")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn query_is_part_of_identity() {
        let a = CacheKey::for_request(&Method::GET, &url("https://x.dev/a?p=1"), None).unwrap();
        let b = CacheKey::for_request(&Method::GET, &url("https://x.dev/a?p=2"), None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn display_carries_method_and_url() {
        let key = CacheKey::for_get(&url("https://x.dev/a"));
        assert_eq!(key.to_string(), "GET https://x.dev/a");
    }
}
