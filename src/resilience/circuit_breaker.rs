//! Circuit breaker with a count-based sliding window.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::metrics::CIRCUIT_TRANSITIONS_TOTAL;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests flow through normally
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, allowing a bounded number of trial requests
    HalfOpen,
}

impl CircuitState {
    fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of recent calls considered when computing the failure rate
    pub window_size: usize,
    /// Failure rate (0.0 to 1.0) above which the circuit opens
    pub failure_rate_threshold: f64,
    /// Time to wait before transitioning from open to half-open
    pub open_cooldown: Duration,
    /// Number of trial calls permitted while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            failure_rate_threshold: 0.5,
            open_cooldown: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// Outcomes of the most recent calls, true = success
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_calls: u32,
    half_open_successes: u32,
}

/// Circuit breaker shared by all callers of one named resource.
///
/// The failure rate is evaluated over the last `window_size` recorded calls
/// and only once the window is full; the circuit opens when the rate exceeds
/// the threshold. A single failure while half-open reopens the circuit
/// immediately. All state lives behind one mutex.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a breaker for a named resource with default configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    /// Create a breaker for a named resource with custom configuration
    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                half_open_calls: 0,
                half_open_successes: 0,
            }),
        }
    }

    /// Resource name this breaker guards
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call is permitted right now.
    ///
    /// An open breaker whose cool-down has elapsed transitions to half-open
    /// and admits the call as a trial; half-open admits calls up to the
    /// trial quota.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.open_cooldown)
                    .unwrap_or(true);
                if elapsed {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_calls = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CircuitState::Closed => {
                Self::push_outcome(&mut inner, self.config.window_size, true);
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_max_calls {
                    self.transition(&mut inner, CircuitState::Closed);
                    tracing::info!(
                        resource = %self.name,
                        "Circuit breaker closed after successful recovery"
                    );
                }
            }
            CircuitState::Open => {
                // Late result from a call admitted before the transition
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CircuitState::Closed => {
                Self::push_outcome(&mut inner, self.config.window_size, false);
                if inner.window.len() >= self.config.window_size {
                    let failures = inner.window.iter().filter(|ok| !**ok).count();
                    let rate = failures as f64 / inner.window.len() as f64;
                    if rate > self.config.failure_rate_threshold {
                        self.transition(&mut inner, CircuitState::Open);
                        tracing::warn!(
                            resource = %self.name,
                            failure_rate = rate,
                            "Circuit breaker opened"
                        );
                    }
                }
            }
            CircuitState::HalfOpen => {
                // Any failure in half-open state reopens the circuit
                self.transition(&mut inner, CircuitState::Open);
                tracing::warn!(
                    resource = %self.name,
                    "Circuit breaker reopened after failure in half-open state"
                );
            }
            CircuitState::Open => {}
        }
    }

    /// Get the current state without admitting a call
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    fn push_outcome(inner: &mut Inner, window_size: usize, ok: bool) {
        if inner.window.len() >= window_size {
            inner.window.pop_front();
        }
        inner.window.push_back(ok);
    }

    fn transition(&self, inner: &mut Inner, new_state: CircuitState) {
        inner.state = new_state;
        inner.half_open_calls = 0;
        inner.half_open_successes = 0;

        match new_state {
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Closed | CircuitState::HalfOpen => {
                inner.window.clear();
                inner.opened_at = None;
            }
        }

        CIRCUIT_TRANSITIONS_TOTAL
            .with_label_values(&[self.name.as_str(), new_state.as_str()])
            .inc();
        tracing::debug!(
            resource = %self.name,
            state = new_state.as_str(),
            "Circuit breaker state changed"
        );
    }
}
