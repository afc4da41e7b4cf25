//! Feedback API endpoint
//!
//! POST /api/v1/feedback - Mail a bug report or suggestion to the team

use axum::{extract::State, http::StatusCode, Json};

use crate::api::middleware::{ApiError, AppState};
use crate::api::responses::MessageResponse;
use crate::services::FeedbackInput;

pub async fn submit_feedback(
    State(state): State<AppState>,
    Json(body): Json<FeedbackInput>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    state.feedback_service.submit(&body).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new("Thanks for your feedback!")),
    ))
}
