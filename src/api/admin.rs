//! Admin API endpoints
//!
//! - GET /api/v1/admin/stats - Dashboard counts and recent uploads
//! - GET /api/v1/admin/users - Accounts, newest first
//! - PUT /api/v1/admin/users/{id}/role - Change a role
//! - GET /api/v1/admin/content?status= - Every question in any state
//! - DELETE /api/v1/admin/questions/{id} - Hard delete
//! - GET /api/v1/admin/moderation-log
//!
//! Taxonomy CRUD is mounted from [`crate::api::taxonomy::admin_router`].

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, put},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::PaginationQuery;
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::UserResponse;
use crate::models::{
    ModerationLogEntry, PagedResult, QuestionStatus, QuestionWithMeta, UserRole,
};
use crate::services::AdminStats;

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: UserRole,
}

#[derive(Debug, Deserialize)]
pub struct ContentQuery {
    pub status: Option<String>,
}

impl ContentQuery {
    fn status(&self) -> Result<Option<QuestionStatus>, ApiError> {
        match self.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(None),
            Some(s) => s
                .parse()
                .map(Some)
                .map_err(|_| ApiError::validation_error(format!("Unknown status: {}", s))),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats))
        .route("/users", get(list_users))
        .route("/users/{id}/role", put(update_role))
        .route("/content", get(list_content))
        .route("/questions/{id}", delete(delete_question))
        .route("/moderation-log", get(moderation_log))
}

async fn stats(State(state): State<AppState>) -> Result<Json<AdminStats>, ApiError> {
    Ok(Json(state.admin_service.stats().await?))
}

async fn list_users(
    State(state): State<AppState>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<PagedResult<UserResponse>>, ApiError> {
    let users = state.admin_service.list_users(&page.params()).await?;
    Ok(Json(users.map(UserResponse::from)))
}

async fn update_role(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<RoleRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let updated = state
        .admin_service
        .update_user_role(&user.0, id, body.role)
        .await?;
    Ok(Json(updated.into()))
}

async fn list_content(
    State(state): State<AppState>,
    Query(query): Query<ContentQuery>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<PagedResult<QuestionWithMeta>>, ApiError> {
    let status = query.status()?;
    Ok(Json(
        state
            .admin_service
            .list_content(status, &page.params())
            .await?,
    ))
}

async fn delete_question(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.admin_service.delete_question(&user.0, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn moderation_log(
    State(state): State<AppState>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<PagedResult<ModerationLogEntry>>, ApiError> {
    Ok(Json(
        state
            .admin_service
            .moderation_log(&page.params())
            .await?,
    ))
}
