//! Circuit breaker guarding the backing store.
//!
//! Closed → Open after `fail_max` consecutive availability failures;
//! Open → HalfOpen once `open_duration` has elapsed; HalfOpen allows a
//! single probe and moves to Closed on its success or back to Open on its
//! failure. While open, callers fail fast without touching the network.
//!
//! Uses `tokio::time::Instant` so breaker timing tests can drive the
//! clock with `tokio::time::pause`.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Process-global breaker shared by every request the client makes.
#[derive(Debug)]
pub struct CircuitBreaker {
    fail_max: u32,
    open_duration: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(fail_max: u32, open_duration: Duration) -> Self {
        Self {
            fail_max,
            open_duration,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Ask permission to make a request.
    ///
    /// `false` means fail fast: the breaker is open (or a half-open probe
    /// is already in flight). When the open window has elapsed this call
    /// itself moves the breaker to half-open and grants the probe.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.open_duration);
                if elapsed {
                    self.set_state(&mut inner, BreakerState::HalfOpen);
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// The backend proved available (any response, success or 4xx).
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        inner.opened_at = None;
        if inner.state != BreakerState::Closed {
            self.set_state(&mut inner, BreakerState::Closed);
        }
    }

    /// An availability failure (5xx, 429, timeout, network error).
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.opened_at = Some(Instant::now());
                self.set_state(&mut inner, BreakerState::Open);
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.fail_max {
                    inner.opened_at = Some(Instant::now());
                    self.set_state(&mut inner, BreakerState::Open);
                }
            }
            // Failures reported by requests that were already in flight
            // when the breaker opened change nothing.
            BreakerState::Open => {}
        }
    }

    #[must_use]
    pub fn state(&self) -> BreakerState {
        // Surface Open → HalfOpen elapsing without requiring a request.
        let inner = self.lock();
        if inner.state == BreakerState::Open
            && inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.open_duration)
        {
            return BreakerState::HalfOpen;
        }
        inner.state
    }

    fn set_state(&self, inner: &mut Inner, next: BreakerState) {
        tracing::info!(from = inner.state.as_str(), to = next.as_str(), "Circuit breaker transition");
        metrics::counter!(
            "voxline_store_breaker_transitions_total",
            "to" => next.as_str()
        )
        .increment(1);
        inner.state = next;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
