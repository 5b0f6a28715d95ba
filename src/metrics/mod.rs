//! Prometheus metrics for the dispatch pipeline.
//!
//! Counters cover the enqueue path, the per-tier worker pools, the outcome
//! correlation loop, and circuit-breaker state transitions.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "relay";

lazy_static! {
    // ============================================================================
    // Producer metrics
    // ============================================================================

    /// Notifications accepted onto a priority topic
    pub static ref ENQUEUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_enqueued_total", METRIC_PREFIX),
        "Notifications enqueued by priority tier",
        &["tier"]
    ).unwrap();

    /// Enqueue attempts that failed after retries
    pub static ref ENQUEUE_FAILED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_enqueue_failed_total", METRIC_PREFIX),
        "Enqueue failures by priority tier",
        &["tier"]
    ).unwrap();

    // ============================================================================
    // Dispatcher metrics
    // ============================================================================

    /// Successful channel dispatches
    pub static ref DISPATCH_SUCCESS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_dispatch_success_total", METRIC_PREFIX),
        "Successful dispatches by priority tier",
        &["tier"]
    ).unwrap();

    /// Channel dispatches that failed terminally for the current delivery
    pub static ref DISPATCH_FAILED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_dispatch_failed_total", METRIC_PREFIX),
        "Failed dispatches by priority tier",
        &["tier"]
    ).unwrap();

    /// Outcomes published to the status topic
    pub static ref OUTCOMES_PUBLISHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_outcomes_published_total", METRIC_PREFIX),
        "Outcomes published to the status topic"
    ).unwrap();

    // ============================================================================
    // Correlation metrics
    // ============================================================================

    /// Outcomes that arrived with no registered waiter
    pub static ref OUTCOMES_ORPHANED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_outcomes_orphaned_total", METRIC_PREFIX),
        "Outcomes discarded because no waiter was registered"
    ).unwrap();

    /// Callers that gave up waiting for an outcome
    pub static ref CORRELATION_TIMEOUTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_correlation_timeouts_total", METRIC_PREFIX),
        "Correlation waits that timed out"
    ).unwrap();

    // ============================================================================
    // Resilience metrics
    // ============================================================================

    /// Circuit breaker state transitions
    pub static ref CIRCUIT_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_circuit_transitions_total", METRIC_PREFIX),
        "Circuit breaker state transitions by resource and new state",
        &["resource", "state"]
    ).unwrap();

    // ============================================================================
    // Broker metrics
    // ============================================================================

    /// Messages dropped after exhausting the redelivery limit
    pub static ref BROKER_REDELIVERY_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broker_redelivery_dropped_total", METRIC_PREFIX),
        "Messages dropped after the redelivery limit"
    ).unwrap();
}

/// Encode all registered metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
