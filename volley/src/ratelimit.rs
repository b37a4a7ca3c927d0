//! Rate-limit header interpretation and per-host pacing.

use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use http::HeaderMap;

const LIMIT: &str = "x-ratelimit-limit";
const REMAINING: &str = "x-ratelimit-remaining";
const RESET: &str = "x-ratelimit-reset";
const RETRY_AFTER: &str = "retry-after";

/// Parsed rate-limit state for one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Requests allowed per window.
    pub limit: u64,
    /// Requests left in the current window.
    pub remaining: u64,
    /// When the window resets (`X-RateLimit-Reset`, epoch seconds).
    pub reset_at: DateTime<Utc>,
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Parse `X-RateLimit-*` headers, when the full triple is present.
pub fn parse_rate_limit(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let limit = header_u64(headers, LIMIT)?;
    let remaining = header_u64(headers, REMAINING)?;
    let reset_epoch = header_u64(headers, RESET)?;
    Some(RateLimitInfo {
        limit,
        remaining,
        reset_at: DateTime::from_timestamp(reset_epoch as i64, 0)?,
    })
}

/// Parse `Retry-After`: either delay seconds or an HTTP-date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let when = httpdate::parse_http_date(value).ok()?;
    when.duration_since(SystemTime::now()).ok()
}

/// Retains the latest [`RateLimitInfo`] per host and answers whether calls
/// to a host should be delayed until its window resets.
#[derive(Debug, Default)]
pub struct RateLimitObserver {
    hosts: DashMap<String, RateLimitInfo>,
}

impl RateLimitObserver {
    /// An observer with no recorded state.
    pub fn new() -> Self {
        RateLimitObserver {
            hosts: DashMap::new(),
        }
    }

    /// Record the rate-limit headers of a response from `host`.
    pub fn observe(&self, host: &str, headers: &HeaderMap) {
        if let Some(info) = parse_rate_limit(headers) {
            if info.remaining == 0 {
                tracing::debug!(host, reset_at = %info.reset_at, "rate limit window exhausted");
            }
            self.hosts.insert(host.to_owned(), info);
        }
    }

    /// The last recorded state for `host`.
    pub fn info(&self, host: &str) -> Option<RateLimitInfo> {
        self.hosts.get(host).map(|entry| *entry.value())
    }

    /// How long a call to `host` should wait before dispatch, if the window
    /// is exhausted and has not reset yet.
    pub fn required_delay(&self, host: &str) -> Option<Duration> {
        let info = self.info(host)?;
        if info.remaining > 0 {
            return None;
        }
        let wait = info.reset_at.signed_duration_since(Utc::now());
        wait.to_std().ok().filter(|d| !d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(entries: &[(&str, String)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in entries {
            map.insert(
                http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn parses_the_header_triple() {
        let reset = Utc::now().timestamp() + 60;
        let map = headers(&[
            ("x-ratelimit-limit", "100".into()),
            ("x-ratelimit-remaining", "42".into()),
            ("x-ratelimit-reset", reset.to_string()),
        ]);
        let info = parse_rate_limit(&map).unwrap();
        assert_eq!(info.limit, 100);
        assert_eq!(info.remaining, 42);
        assert_eq!(info.reset_at.timestamp(), reset);
    }

    #[test]
    fn incomplete_headers_parse_to_none() {
        let map = headers(&[("x-ratelimit-limit", "100".into())]);
        assert!(parse_rate_limit(&map).is_none());
        assert!(parse_rate_limit(&HeaderMap::new()).is_none());
    }

    #[test]
    fn retry_after_seconds_and_http_date() {
        let map = headers(&[("retry-after", "120".into())]);
        assert_eq!(parse_retry_after(&map), Some(Duration::from_secs(120)));

        let when = SystemTime::now() + Duration::from_secs(90);
        let map = headers(&[("retry-after", httpdate::fmt_http_date(when))]);
        let parsed = parse_retry_after(&map).unwrap();
        assert!(parsed <= Duration::from_secs(90));
        assert!(parsed >= Duration::from_secs(85));

        assert!(parse_retry_after(&HeaderMap::new()).is_none());
    }

    #[test]
    fn exhausted_window_requires_a_delay() {
        let observer = RateLimitObserver::new();
        let reset = Utc::now().timestamp() + 30;
        observer.observe(
            "api.example.com",
            &headers(&[
                ("x-ratelimit-limit", "10".into()),
                ("x-ratelimit-remaining", "0".into()),
                ("x-ratelimit-reset", reset.to_string()),
            ]),
        );

        let delay = observer.required_delay("api.example.com").unwrap();
        assert!(delay <= Duration::from_secs(30));
        assert!(delay >= Duration::from_secs(25));
        assert!(observer.required_delay("other.example.com").is_none());
    }

    #[test]
    fn remaining_budget_needs_no_delay() {
        let observer = RateLimitObserver::new();
        let reset = Utc::now().timestamp() + 30;
        observer.observe(
            "api.example.com",
            &headers(&[
                ("x-ratelimit-limit", "10".into()),
                ("x-ratelimit-remaining", "3".into()),
                ("x-ratelimit-reset", reset.to_string()),
            ]),
        );
        assert!(observer.required_delay("api.example.com").is_none());
        assert_eq!(observer.info("api.example.com").unwrap().remaining, 3);
    }

    #[test]
    fn past_reset_needs_no_delay() {
        let observer = RateLimitObserver::new();
        let reset = Utc::now().timestamp() - 5;
        observer.observe(
            "api.example.com",
            &headers(&[
                ("x-ratelimit-limit", "10".into()),
                ("x-ratelimit-remaining", "0".into()),
                ("x-ratelimit-reset", reset.to_string()),
            ]),
        );
        assert!(observer.required_delay("api.example.com").is_none());
    }
}
