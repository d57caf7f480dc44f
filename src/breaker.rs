//! Three-state circuit breaker, one instance per upstream dependency.
//! Generalized from the per-endpoint DNS/connection failover breaker in
//! the original trading backend to per-dependency (SoT, marketplace)
//! here; transitions are the same, state is just reported lazily on
//! query rather than driven by a background timer.

use crate::error::SyncError;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

struct State {
    status: CircuitStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
}

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout: Duration,
    failure_reset_window: Duration,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        open_timeout: Duration,
        success_threshold: u32,
        failure_reset_window: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            success_threshold,
            open_timeout,
            failure_reset_window,
            state: Mutex::new(State {
                status: CircuitStatus::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                last_failure_at: None,
            }),
        }
    }

    /// threshold 5, timeout 60s, success 2, failure-count decays after 5
    /// minutes of no further failures.
    pub fn for_sot() -> Self {
        Self::new("sot", 5, Duration::from_secs(60), 2, Duration::from_secs(300))
    }

    /// threshold 10, timeout 120s, success 3, decay after 10 minutes.
    /// Higher threshold than SoT because 429s are retried to success by
    /// the Retrier/RateGovernor and never reach the breaker as failures.
    pub fn for_marketplace() -> Self {
        Self::new("marketplace", 10, Duration::from_secs(120), 3, Duration::from_secs(600))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status, resolving the lazy open -> half-open transition.
    pub fn status(&self) -> CircuitStatus {
        let mut state = self.state.lock();
        self.resolve(&mut state)
    }

    /// Fails fast with [`SyncError::BreakerOpen`] if the breaker is open;
    /// otherwise permits the call (including the half-open probe).
    pub fn check(&self) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        match self.resolve(&mut state) {
            CircuitStatus::Open => Err(SyncError::BreakerOpen { name: self.name.clone() }),
            CircuitStatus::Closed | CircuitStatus::HalfOpen => Ok(()),
        }
    }

    pub fn on_success(&self) {
        let mut state = self.state.lock();
        self.resolve(&mut state);
        match state.status {
            CircuitStatus::HalfOpen => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.success_threshold {
                    state.status = CircuitStatus::Closed;
                    state.consecutive_failures = 0;
                    state.consecutive_successes = 0;
                    state.opened_at = None;
                }
            }
            CircuitStatus::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitStatus::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut state = self.state.lock();
        self.resolve(&mut state);
        let now = Instant::now();
        state.last_failure_at = Some(now);

        match state.status {
            CircuitStatus::HalfOpen => {
                state.status = CircuitStatus::Open;
                state.opened_at = Some(now);
                state.consecutive_successes = 0;
            }
            CircuitStatus::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.failure_threshold {
                    state.status = CircuitStatus::Open;
                    state.opened_at = Some(now);
                }
            }
            CircuitStatus::Open => {}
        }
    }

    fn resolve(&self, state: &mut State) -> CircuitStatus {
        if state.status == CircuitStatus::Open {
            if let Some(opened_at) = state.opened_at {
                if opened_at.elapsed() >= self.open_timeout {
                    state.status = CircuitStatus::HalfOpen;
                    state.consecutive_successes = 0;
                }
            }
        } else if state.status == CircuitStatus::Closed && state.consecutive_failures > 0 {
            if let Some(last_failure) = state.last_failure_at {
                if last_failure.elapsed() >= self.failure_reset_window {
                    state.consecutive_failures = 0;
                }
            }
        }
        state.status
    }
}
