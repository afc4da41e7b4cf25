//! Moderation API endpoints (moderator or admin)
//!
//! - GET /api/v1/moderation/pending - Review queue, oldest first
//! - POST /api/v1/moderation/questions/{id}/approve
//! - POST /api/v1/moderation/questions/{id}/reject - Body `{reason?}`
//! - POST /api/v1/moderation/questions/{id}/flag - Body `{reason?}`
//! - GET /api/v1/moderation/questions/{id}/history

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::PaginationQuery;
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{ModerationLogEntry, PagedResult, QuestionWithMeta};

#[derive(Debug, Default, Deserialize)]
pub struct ReviewRequest {
    pub reason: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/pending", get(list_pending))
        .route("/questions/{id}/approve", post(approve))
        .route("/questions/{id}/reject", post(reject))
        .route("/questions/{id}/flag", post(flag))
        .route("/questions/{id}/history", get(history))
}

async fn list_pending(
    State(state): State<AppState>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<PagedResult<QuestionWithMeta>>, ApiError> {
    Ok(Json(
        state
            .moderation_service
            .list_pending(&page.params())
            .await?,
    ))
}

async fn approve(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<QuestionWithMeta>, ApiError> {
    Ok(Json(state.moderation_service.approve(&user.0, id).await?))
}

async fn reject(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    body: Option<Json<ReviewRequest>>,
) -> Result<Json<QuestionWithMeta>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    Ok(Json(
        state
            .moderation_service
            .reject(&user.0, id, body.reason.as_deref())
            .await?,
    ))
}

async fn flag(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    body: Option<Json<ReviewRequest>>,
) -> Result<Json<QuestionWithMeta>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    Ok(Json(
        state
            .moderation_service
            .flag(&user.0, id, body.reason.as_deref())
            .await?,
    ))
}

async fn history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<ModerationLogEntry>>, ApiError> {
    Ok(Json(state.moderation_service.history(id).await?))
}
