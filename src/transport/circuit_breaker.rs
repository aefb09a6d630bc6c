//! Per-endpoint circuit breakers.
//!
//! A breaker opens after `failure_threshold` consecutive failures and refuses
//! calls until `reset_timeout` has elapsed since the last failure. It then
//! moves to half-open (lazily, on the next state read) and admits a single
//! trial call: success closes it, failure reopens it.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

/// State of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    /// Calls go through.
    Closed,
    /// Calls are refused.
    Open,
    /// One trial call is allowed.
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
}

/// Circuit breaker guarding one endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: impl Into<String>, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_time: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh(&self, inner: &mut Inner) {
        if inner.state != BreakerState::Open {
            return;
        }
        let elapsed = inner
            .last_failure_time
            .map_or(true, |at| at.elapsed() >= self.reset_timeout);
        if elapsed {
            info!(endpoint = %self.name, "circuit breaker half-open");
            inner.state = BreakerState::HalfOpen;
            inner.trial_in_flight = false;
        }
    }

    /// Current state, moving OPEN to HALF_OPEN once the reset timeout elapsed.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Consecutive failures recorded since the last success.
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Whether a call may go through now.
    ///
    /// While half-open only the first caller is admitted until that trial
    /// call's outcome is recorded.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => !std::mem::replace(&mut inner.trial_in_flight, true),
        }
    }

    /// Records a successful call: resets the failure count and closes the breaker.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != BreakerState::Closed {
            info!(endpoint = %self.name, "circuit breaker closed");
        }
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.trial_in_flight = false;
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_time = Some(Instant::now());
        inner.trial_in_flight = false;
        let open = inner.state == BreakerState::HalfOpen
            || inner.failure_count >= self.failure_threshold;
        if open && inner.state != BreakerState::Open {
            warn!(
                endpoint = %self.name,
                failures = inner.failure_count,
                "circuit breaker open"
            );
            inner.state = BreakerState::Open;
        }
    }

    /// Forces the breaker back to CLOSED.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure_time = None;
        inner.trial_in_flight = false;
    }
}

/// Process-wide map of breakers, keyed by endpoint URL.
///
/// The map lock is only held to look a breaker up, so calls to different
/// endpoints never wait on each other.
#[derive(Debug)]
pub struct BreakerRegistry {
    failure_threshold: u32,
    reset_timeout: Duration,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Create an empty registry whose breakers use the given settings.
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Breaker for `endpoint`, created on first use.
    pub fn get(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(endpoint.to_owned())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    endpoint,
                    self.failure_threshold,
                    self.reset_timeout,
                ))
            })
            .clone()
    }

    /// Closes every known breaker.
    pub fn reset_all(&self) {
        let breakers = self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for breaker in breakers.values() {
            breaker.reset();
        }
    }
}
