//! Circuit breaker gating transport attempts.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Thresholds for the breaker state machine.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures in `Closed` before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays `Open` before permitting a probe.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow; failures accumulate.
    Closed,
    /// Calls are rejected until the reset timeout elapses.
    Open {
        /// When the breaker opened.
        since: Instant,
    },
    /// One probe is in flight; its outcome decides the next state.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
}

/// Three-state circuit breaker.
///
/// The engine asks [`CircuitBreaker::should_allow`] before every transport
/// attempt — including each attempt inside a retry loop — and reports the
/// outcome with [`record_success`](CircuitBreaker::record_success) /
/// [`record_failure`](CircuitBreaker::record_failure). Transitions are
/// atomic under a short mutex, so concurrent callers observe a consistent
/// machine.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// A closed breaker with the given thresholds.
    pub fn new(config: BreakerConfig) -> Self {
        CircuitBreaker {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a call may proceed right now.
    ///
    /// In `Open`, the first call after the reset timeout flips the breaker to
    /// `HalfOpen` and is admitted as the probe.
    pub fn should_allow(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open { since } => {
                if since.elapsed() > self.config.reset_timeout {
                    tracing::debug!("breaker reset timeout elapsed, probing");
                    inner.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Report a successful attempt. Closes the breaker and resets the counter.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!("breaker closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
    }

    /// Report a failed attempt.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    tracing::warn!(failures = inner.failures, "breaker opened");
                    inner.state = CircuitState::Open {
                        since: Instant::now(),
                    };
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!("probe failed, breaker re-opened");
                inner.state = CircuitState::Open {
                    since: Instant::now(),
                };
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// The current state.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: threshold,
            reset_timeout: reset,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_consecutive_failures() {
        let b = breaker(3, Duration::from_secs(10));
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.should_allow());

        b.record_failure();
        assert!(matches!(b.state(), CircuitState::Open { .. }));
        assert!(!b.should_allow());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_failure_counter() {
        let b = breaker(3, Duration::from_secs(10));
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn probes_after_reset_timeout() {
        let b = breaker(1, Duration::from_secs(10));
        b.record_failure();
        assert!(!b.should_allow());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(b.should_allow());
        assert_eq!(b.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_outcome_decides_the_next_state() {
        let b = breaker(1, Duration::from_secs(10));
        b.record_failure();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(b.should_allow());

        // Failed probe re-opens with a fresh reset window.
        b.record_failure();
        assert!(matches!(b.state(), CircuitState::Open { .. }));
        assert!(!b.should_allow());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(b.should_allow());
        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.should_allow());
    }
}
