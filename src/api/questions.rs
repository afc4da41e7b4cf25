//! Question API endpoints
//!
//! Public archive:
//! - GET /api/v1/questions - Browse approved questions
//! - GET /api/v1/questions/{id} - One approved question
//! - GET /api/v1/questions/{id}/download - Image as an attachment
//! - POST /api/v1/questions/bundle - Zip of several approved questions
//!
//! Signed in:
//! - GET /api/v1/questions/mine - Own submissions in every state

use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::{parse_optional, PaginationQuery};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{attachment, public_question};
use crate::models::{PagedResult, QuestionFilter, QuestionWithMeta};

/// Browse filters. Values arrive as strings so that blank or malformed
/// ones can be ignored instead of failing the request.
#[derive(Debug, Default, Deserialize)]
pub struct BrowseQuery {
    pub department_id: Option<String>,
    pub course_id: Option<String>,
    pub exam_name_id: Option<String>,
    pub year: Option<String>,
    pub session: Option<String>,
    pub search: Option<String>,
}

impl BrowseQuery {
    pub fn to_filter(&self) -> QuestionFilter {
        QuestionFilter {
            department_id: parse_optional(self.department_id.as_deref()),
            course_id: parse_optional(self.course_id.as_deref()),
            exam_name_id: parse_optional(self.exam_name_id.as_deref()),
            year: parse_optional(self.year.as_deref()),
            session: parse_optional(self.session.as_deref()),
            search: self
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BundleRequest {
    pub ids: Vec<i64>,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(browse))
        .route("/bundle", post(bundle))
        .route("/{id}", get(get_question))
        .route("/{id}/download", get(download))
}

pub fn protected_router() -> Router<AppState> {
    Router::new().route("/mine", get(my_submissions))
}

/// GET /api/v1/questions
async fn browse(
    State(state): State<AppState>,
    Query(filter): Query<BrowseQuery>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<PagedResult<QuestionWithMeta>>, ApiError> {
    let result = state
        .question_service
        .browse(filter.to_filter(), &page.params())
        .await?;
    Ok(Json(result.map(public_question)))
}

/// GET /api/v1/questions/{id}
async fn get_question(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<QuestionWithMeta>, ApiError> {
    let question = state.question_service.get_public(id).await?;
    Ok(Json(public_question(question)))
}

/// GET /api/v1/questions/{id}/download
async fn download(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    attachment(state.download_service.download(id).await?)
}

/// POST /api/v1/questions/bundle
async fn bundle(
    State(state): State<AppState>,
    Json(body): Json<BundleRequest>,
) -> Result<Response, ApiError> {
    attachment(state.download_service.bundle(&body.ids).await?)
}

/// GET /api/v1/questions/mine
async fn my_submissions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<PagedResult<QuestionWithMeta>>, ApiError> {
    let result = state
        .question_service
        .my_submissions(&user.0, &page.params())
        .await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExamSession;

    #[test]
    fn test_browse_query_ignores_malformed_values() {
        let query = BrowseQuery {
            department_id: Some("3".into()),
            course_id: Some("".into()),
            exam_name_id: Some("abc".into()),
            year: Some("twenty".into()),
            session: Some("fall".into()),
            search: Some("  graphs ".into()),
        };
        let filter = query.to_filter();
        assert_eq!(filter.department_id, Some(3));
        assert_eq!(filter.course_id, None);
        assert_eq!(filter.exam_name_id, None);
        assert_eq!(filter.year, None);
        assert_eq!(filter.session, Some(ExamSession::Fall));
        assert_eq!(filter.search.as_deref(), Some("graphs"));
        assert_eq!(filter.status, None);
    }

    #[test]
    fn test_blank_search_is_dropped() {
        let query = BrowseQuery {
            search: Some("   ".into()),
            ..Default::default()
        };
        assert!(query.to_filter().search.is_none());
    }
}
