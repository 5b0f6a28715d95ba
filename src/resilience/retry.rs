//! Per-tier retry policies with jittered backoff.

use std::time::Duration;

use rand::Rng;

use crate::error::DispatchError;

/// Which error classes a policy retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCondition {
    /// Retry only errors classified as transient
    TransientOnly,
    /// Retry every error (critical tier)
    AnyError,
}

/// Retry policy attached to a priority tier at configuration time.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first call
    pub max_attempts: u32,
    /// Base delay between attempts
    pub backoff: Duration,
    /// Jitter factor (0.0 to 1.0) applied to the base delay
    pub jitter_factor: f64,
    /// Which failures are retried
    pub condition: RetryCondition,
}

impl RetryPolicy {
    /// Standard policy: 3 attempts, 500ms backoff, transient errors only.
    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
            jitter_factor: 0.1,
            condition: RetryCondition::TransientOnly,
        }
    }

    /// Aggressive policy for critical traffic: 5 attempts, 200ms backoff,
    /// retries on any error.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(200),
            jitter_factor: 0.1,
            condition: RetryCondition::AnyError,
        }
    }

    /// Single attempt, no in-process retry.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
            jitter_factor: 0.0,
            condition: RetryCondition::TransientOnly,
        }
    }

    /// Whether another attempt should follow the given failure.
    pub fn should_retry(&self, err: &DispatchError) -> bool {
        match self.condition {
            RetryCondition::AnyError => true,
            RetryCondition::TransientOnly => err.is_transient(),
        }
    }

    /// Delay before the next attempt, with jitter applied.
    pub fn delay(&self) -> Duration {
        if self.backoff.as_millis() == 0 || self.jitter_factor <= 0.0 {
            return self.backoff;
        }

        let base = self.backoff.as_millis() as f64;
        let jitter_range = base * self.jitter_factor;
        let jitter = rand::rng().random_range(-jitter_range..jitter_range);
        Duration::from_millis((base + jitter).max(1.0) as u64)
    }
}
