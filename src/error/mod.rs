use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::broker::BrokerError;
use crate::notification::{Channel, Priority};

/// Errors produced by the dispatch pipeline.
///
/// `UnsupportedPriority` and `UnsupportedChannel` are caller-input errors and
/// are never retried. `TransientSend` and `Broker` are retryable under the
/// transient-only retry condition; `CircuitOpen` is terminal for the current
/// call and aborts any remaining retry attempts.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unsupported priority: {0}")]
    UnsupportedPriority(Priority),

    #[error("unsupported channel: {0}")]
    UnsupportedChannel(Channel),

    #[error("transient send failure: {0}")]
    TransientSend(String),

    #[error("permanent send failure: {0}")]
    PermanentSend(String),

    #[error("circuit open for resource '{resource}'")]
    CircuitOpen { resource: String },

    #[error("no outcome within {0:?}")]
    CorrelationTimeout(Duration),

    #[error("pending correlation for {0} was superseded")]
    CorrelationSuperseded(Uuid),

    #[error("template error: {0}")]
    Template(String),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Whether the standard (transient-only) retry condition applies.
    pub fn is_transient(&self) -> bool {
        match self {
            DispatchError::TransientSend(_) => true,
            DispatchError::Broker(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Application-level error for the HTTP surface.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, client_message, log_message) = match &self {
            AppError::Config(e) => {
                let log_msg = e.to_string();
                let client_msg = if is_production() {
                    "Configuration error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", client_msg, log_msg)
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                msg.clone(),
            ),
            AppError::Dispatch(e) => {
                let log_msg = e.to_string();
                let (status, code) = match e {
                    DispatchError::UnsupportedPriority(_) | DispatchError::UnsupportedChannel(_) => {
                        (StatusCode::BAD_REQUEST, "UNSUPPORTED_INPUT")
                    }
                    DispatchError::CorrelationTimeout(_) => {
                        (StatusCode::GATEWAY_TIMEOUT, "OUTCOME_TIMEOUT")
                    }
                    DispatchError::CircuitOpen { .. } => {
                        (StatusCode::SERVICE_UNAVAILABLE, "CIRCUIT_OPEN")
                    }
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, "DISPATCH_ERROR"),
                };
                let client_msg = if is_production() && status == StatusCode::INTERNAL_SERVER_ERROR {
                    "Internal server error".to_string()
                } else {
                    log_msg.clone()
                };
                (status, code, client_msg, log_msg)
            }
            AppError::Internal(e) => {
                let log_msg = e.clone();
                let client_msg = if is_production() {
                    "Internal server error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", client_msg, log_msg)
            }
        };

        // Always log the detailed error server-side
        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %log_message,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DispatchError::TransientSend("smtp 421".into()).is_transient());
        assert!(!DispatchError::PermanentSend("bad address".into()).is_transient());
        assert!(!DispatchError::UnsupportedChannel(Channel::Push).is_transient());
        assert!(!DispatchError::CircuitOpen { resource: "email".into() }.is_transient());
    }

    #[test]
    fn test_broker_errors_are_transient() {
        let err = DispatchError::from(BrokerError::Publish {
            topic: "queue.normal".into(),
            reason: "connection reset".into(),
        });
        assert!(err.is_transient());
    }
}
