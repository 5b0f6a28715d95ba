//! Circuit-breaking and retry for fallible asynchronous operations.
//!
//! `ResiliencePolicy` owns one circuit breaker per named resource and runs
//! operations under a retry policy: each attempt first consults the breaker
//! (an open breaker short-circuits with `CircuitOpen` without invoking the
//! operation, and a breaker that opens mid-retry aborts the remaining
//! attempts), then records the attempt's outcome in the breaker's window.

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{RetryCondition, RetryPolicy};

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::DispatchError;

/// Shared circuit-breaker + retry executor.
pub struct ResiliencePolicy {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    breaker_config: CircuitBreakerConfig,
}

impl ResiliencePolicy {
    /// Create an executor with default breaker configuration
    pub fn new() -> Self {
        Self::with_breaker_config(CircuitBreakerConfig::default())
    }

    /// Create an executor whose breakers use the given configuration
    pub fn with_breaker_config(breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            breaker_config,
        }
    }

    /// Get or create the breaker guarding a named resource.
    pub fn breaker(&self, resource: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(resource.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_config(
                    resource,
                    self.breaker_config.clone(),
                ))
            })
            .clone()
    }

    /// Run an operation under the named breaker and the given retry policy.
    ///
    /// Returns the operation's value on the first success, `CircuitOpen`
    /// when the breaker rejects an attempt, or the last observed error once
    /// attempts are exhausted or the failure is not retryable.
    pub async fn execute<T, F, Fut>(
        &self,
        resource: &str,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> Result<T, DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        let breaker = self.breaker(resource);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            if !breaker.try_acquire() {
                return Err(DispatchError::CircuitOpen {
                    resource: resource.to_string(),
                });
            }

            match operation().await {
                Ok(value) => {
                    breaker.record_success();
                    return Ok(value);
                }
                Err(err) => {
                    breaker.record_failure();
                    tracing::warn!(
                        resource = %resource,
                        attempt = attempt,
                        max_attempts = policy.max_attempts,
                        error = %err,
                        "Operation attempt failed"
                    );

                    if attempt >= policy.max_attempts || !policy.should_retry(&err) {
                        return Err(err);
                    }

                    tokio::time::sleep(policy.delay()).await;
                }
            }
        }
    }
}

impl Default for ResiliencePolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_policy(max_attempts: u32, condition: RetryCondition) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(5),
            jitter_factor: 0.0,
            condition,
        }
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let resilience = ResiliencePolicy::new();
        let result = resilience
            .execute("res", &RetryPolicy::standard(), || async { Ok::<_, DispatchError>(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_transient_failures_retried_to_success() {
        let resilience = ResiliencePolicy::new();
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        let result = resilience
            .execute(
                "res",
                &fast_policy(3, RetryCondition::TransientOnly),
                move || async move {
                    if calls_ref.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(DispatchError::TransientSend("flaky".into()))
                    } else {
                        Ok(7)
                    }
                },
            )
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried_under_standard() {
        let resilience = ResiliencePolicy::new();
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        let result: Result<(), _> = resilience
            .execute(
                "res",
                &fast_policy(3, RetryCondition::TransientOnly),
                move || async move {
                    calls_ref.fetch_add(1, Ordering::SeqCst);
                    Err(DispatchError::PermanentSend("rejected".into()))
                },
            )
            .await;

        assert!(matches!(result, Err(DispatchError::PermanentSend(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_any_error_condition_retries_permanent_failures() {
        let resilience = ResiliencePolicy::new();
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        let result: Result<(), _> = resilience
            .execute(
                "res",
                &fast_policy(5, RetryCondition::AnyError),
                move || async move {
                    calls_ref.fetch_add(1, Ordering::SeqCst);
                    Err(DispatchError::PermanentSend("rejected".into()))
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_open_breaker_short_circuits_without_invoking() {
        let breaker_config = CircuitBreakerConfig {
            window_size: 10,
            failure_rate_threshold: 0.5,
            open_cooldown: Duration::from_secs(60),
            half_open_max_calls: 3,
        };
        let resilience = ResiliencePolicy::with_breaker_config(breaker_config);

        // Drive the breaker open with a full window of failures
        for _ in 0..10 {
            let _ = resilience
                .execute("res", &fast_policy(1, RetryCondition::TransientOnly), || async {
                    Err::<(), _>(DispatchError::TransientSend("down".into()))
                })
                .await;
        }
        assert_eq!(resilience.breaker("res").state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let result = resilience
            .execute(
                "res",
                &fast_policy(3, RetryCondition::TransientOnly),
                move || async move {
                    calls_ref.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                },
            )
            .await;

        assert!(matches!(result, Err(DispatchError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_breaker_opening_mid_retry_aborts_attempts() {
        let breaker_config = CircuitBreakerConfig {
            window_size: 4,
            failure_rate_threshold: 0.5,
            open_cooldown: Duration::from_secs(60),
            half_open_max_calls: 1,
        };
        let resilience = ResiliencePolicy::with_breaker_config(breaker_config);
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        // 10 permitted attempts, but the window fills and opens after 4 failures
        let result: Result<(), _> = resilience
            .execute(
                "res",
                &fast_policy(10, RetryCondition::AnyError),
                move || async move {
                    calls_ref.fetch_add(1, Ordering::SeqCst);
                    Err(DispatchError::TransientSend("down".into()))
                },
            )
            .await;

        assert!(matches!(result, Err(DispatchError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_breakers_are_shared_per_resource() {
        let resilience = ResiliencePolicy::new();
        let a = resilience.breaker("email");
        let b = resilience.breaker("email");
        let c = resilience.breaker("sms");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
