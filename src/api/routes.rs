use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::handlers::submit_notification;
use super::health::health;
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & metrics
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        // Notification submission
        .route("/api/notifications", post(submit_notification))
}
