//! Cache and retry policies.
//!
//! Policies are plain values carried by an [`Endpoint`](crate::endpoint::Endpoint)
//! and consulted by the engine; the retry decision and delay computation live
//! here so they can be tested in isolation from any transport.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::Error;

/// Per-endpoint cache behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachePolicy {
    /// Caching participates in the call, with the given settings.
    Enabled(CacheSettings),
    /// The call never touches the cache.
    Disabled,
}

/// Settings for an enabled [`CachePolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Serve a fresh cached entry instead of calling the transport.
    pub read: bool,
    /// Store successful response bytes.
    pub write: bool,
    /// Entry TTL; `None` falls back to the engine default.
    pub ttl: Option<Duration>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            read: true,
            write: true,
            ttl: None,
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::Enabled(CacheSettings::default())
    }
}

impl CachePolicy {
    /// Enabled policy with an explicit TTL.
    pub fn ttl(ttl: Duration) -> Self {
        CachePolicy::Enabled(CacheSettings {
            ttl: Some(ttl),
            ..CacheSettings::default()
        })
    }

    /// Whether reads are allowed.
    pub fn reads(&self) -> bool {
        matches!(self, CachePolicy::Enabled(s) if s.read)
    }

    /// Whether writes are allowed.
    pub fn writes(&self) -> bool {
        matches!(self, CachePolicy::Enabled(s) if s.write)
    }

    /// The per-endpoint TTL override, if any.
    pub fn ttl_override(&self) -> Option<Duration> {
        match self {
            CachePolicy::Enabled(s) => s.ttl,
            CachePolicy::Disabled => None,
        }
    }
}

/// Delay strategy between attempts.
#[derive(Clone)]
pub enum Backoff {
    /// Retry without waiting.
    Immediate,
    /// The same delay before every retry.
    Constant(Duration),
    /// `base * multiplier^attempt`, clamped to the policy's `max_delay`.
    Exponential {
        /// Delay before the first retry.
        base: Duration,
        /// Growth factor per attempt.
        multiplier: f64,
    },
    /// Caller-supplied delay function over the attempt number.
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backoff::Immediate => f.write_str("Immediate"),
            Backoff::Constant(d) => f.debug_tuple("Constant").field(d).finish(),
            Backoff::Exponential { base, multiplier } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("multiplier", multiplier)
                .finish(),
            Backoff::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Randomization applied on top of the computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Use the computed delay as-is.
    #[default]
    None,
    /// Uniform over `[0, d]`.
    Full,
    /// `d/2` plus uniform over `[0, d/2]`.
    Equal,
    /// Uniform over `[d, 3d]`.
    Decorrelated,
}

impl Jitter {
    fn apply(self, delay: Duration) -> Duration {
        if delay.is_zero() {
            return delay;
        }
        let d = delay.as_secs_f64();
        let jittered = match self {
            Jitter::None => d,
            Jitter::Full => rand::rng().random_range(0.0..=d),
            Jitter::Equal => d / 2.0 + rand::rng().random_range(0.0..=d / 2.0),
            Jitter::Decorrelated => rand::rng().random_range(d..=d * 3.0),
        };
        Duration::from_secs_f64(jittered)
    }
}

/// Decision and delay policy for retrying classified failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_attempts: u32,
    /// Delay strategy between attempts.
    pub strategy: Backoff,
    /// Randomization applied to computed delays.
    pub jitter: Jitter,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
    /// Status codes that may be retried.
    pub retryable_status_codes: HashSet<u16>,
    /// Whether timeouts are retried.
    pub retry_on_timeout: bool,
    /// Whether connection-level failures are retried.
    pub retry_on_connection: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            strategy: Backoff::Exponential {
                base: Duration::from_millis(500),
                multiplier: 2.0,
            },
            jitter: Jitter::None,
            max_delay: Duration::from_secs(30),
            retryable_status_codes: [408, 429, 500, 502, 503, 504].into_iter().collect(),
            retry_on_timeout: true,
            retry_on_connection: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        }
    }

    /// Exponential policy with the given attempt budget, base, and multiplier.
    pub fn exponential(max_attempts: u32, base: Duration, multiplier: f64) -> Self {
        RetryPolicy {
            max_attempts,
            strategy: Backoff::Exponential { base, multiplier },
            ..RetryPolicy::default()
        }
    }

    /// Whether `error` at 0-based `attempt` should be retried.
    ///
    /// Non-recoverable kinds (auth, decode, 4xx other than the retryable
    /// status set) answer `false` unconditionally.
    pub fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match error {
            Error::Timeout => self.retry_on_timeout,
            e if e.is_connectivity() => self.retry_on_connection,
            Error::RateLimited { .. } => self.retryable_status_codes.contains(&429),
            Error::ServerError { status, .. } | Error::ClientError { status, .. } => {
                self.retryable_status_codes.contains(status)
            }
            _ => false,
        }
    }

    /// The deterministic delay for `attempt`, before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let delay = match &self.strategy {
            Backoff::Immediate => Duration::ZERO,
            Backoff::Constant(d) => *d,
            Backoff::Exponential { base, multiplier } => {
                let secs = base.as_secs_f64() * multiplier.powi(attempt as i32);
                Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
            }
            Backoff::Custom(f) => f(attempt),
        };
        delay.min(self.max_delay)
    }

    /// The delay for `attempt` with jitter applied, clamped to `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.jitter.apply(self.base_delay(attempt)).min(self.max_delay)
    }
}
