//! Notification submission handler.

use axum::{extract::State, Json};

use crate::error::{AppError, Result};
use crate::notification::{NotificationOutcome, NotificationRequest};
use crate::server::AppState;

/// POST /api/notifications - submit a notification and wait for its outcome.
///
/// Blocks the request (without blocking other callers) until the dispatch
/// workers publish the outcome or the correlation ceiling elapses.
pub async fn submit_notification(
    State(state): State<AppState>,
    Json(request): Json<NotificationRequest>,
) -> Result<Json<NotificationOutcome>> {
    validate(&request)?;

    tracing::info!(
        id = %request.id,
        priority = %request.priority,
        channel = %request.channel,
        "Received notification request"
    );

    let outcome = state.orchestrator.submit(request).await?;
    Ok(Json(outcome))
}

fn validate(request: &NotificationRequest) -> std::result::Result<(), AppError> {
    if request.recipient.trim().is_empty() {
        return Err(AppError::Validation("recipient must not be blank".into()));
    }
    if request.subject.trim().is_empty() {
        return Err(AppError::Validation("subject must not be blank".into()));
    }
    Ok(())
}
