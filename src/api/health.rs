//! Health check endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub correlation: CorrelationHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct CorrelationHealthResponse {
    pub pending_waiters: usize,
    pub response_timeout_seconds: u64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        correlation: CorrelationHealthResponse {
            pending_waiters: state.correlator.pending_count(),
            response_timeout_seconds: state.settings.correlation.response_timeout_seconds,
        },
    })
}
