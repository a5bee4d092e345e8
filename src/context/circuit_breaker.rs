//! Circuit breaker guarding the summarization upstream

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,   // Normal operation
    Open,     // Failing, reject requests
    HalfOpen, // Testing if service recovered
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: usize,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
}

impl BreakerInner {
    fn closed() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure: None,
            opened_at: None,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker for one upstream
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerInner::closed()),
            config,
        }
    }

    /// Whether calls should currently be rejected
    ///
    /// An open breaker moves to half-open once the reset timeout has elapsed,
    /// letting one trial request through.
    pub fn is_open(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => false,
            BreakerState::Open => match inner.opened_at {
                Some(opened_at) if opened_at.elapsed() >= self.config.reset_timeout => {
                    inner.state = BreakerState::HalfOpen;
                    false
                }
                _ => true,
            },
        }
    }

    pub fn mark_success(&self) {
        *self.lock() = BreakerInner::closed();
    }

    pub fn mark_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        // A failed half-open trial reopens immediately
        if inner.state == BreakerState::HalfOpen
            || inner.failure_count >= self.config.failure_threshold
        {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        BreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure: inner.last_failure,
        }
    }

    pub fn reset(&self) {
        self.mark_success();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // The inner state is always left consistent, so a poisoned lock is safe to reuse
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub failure_count: usize,
    pub last_failure: Option<Instant>,
}
