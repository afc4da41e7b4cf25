//! API middleware
//!
//! Contains:
//! - the shared application state
//! - the JSON error envelope and its status mapping
//! - session authentication and role checks

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

use crate::cache::Cache;
use crate::config::{Config, StorageConfig};
use crate::db::repositories::{
    SqlxCourseRepository, SqlxDepartmentRepository, SqlxExamNameRepository,
    SqlxModerationLogRepository, SqlxPasswordResetRepository, SqlxQuestionRepository,
    SqlxSessionRepository, SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::models::User;
use crate::services::{
    AdminService, AdminServiceError, DownloadService, DownloadServiceError, EmailError,
    FeedbackService, FeedbackServiceError, LoginRateLimiter, Mailer, ModerationService,
    ModerationServiceError, ObjectStore, QuestionService, QuestionServiceError, TaxonomyService,
    TaxonomyServiceError, UserService, UserServiceError,
};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub user_service: Arc<UserService>,
    pub taxonomy_service: Arc<TaxonomyService>,
    pub question_service: Arc<QuestionService>,
    pub moderation_service: Arc<ModerationService>,
    pub admin_service: Arc<AdminService>,
    pub download_service: Arc<DownloadService>,
    pub feedback_service: Arc<FeedbackService>,
    pub rate_limiter: Arc<LoginRateLimiter>,
    pub storage_config: Arc<StorageConfig>,
}

impl AppState {
    /// Wire repositories and services over one pool
    pub fn new(
        pool: DynDatabasePool,
        cache: Arc<Cache>,
        store: Arc<dyn ObjectStore>,
        mailer: Arc<dyn Mailer>,
        config: &Config,
    ) -> Self {
        let users = SqlxUserRepository::boxed(pool.clone());
        let sessions = SqlxSessionRepository::boxed(pool.clone());
        let questions = SqlxQuestionRepository::boxed(pool.clone());
        let departments = SqlxDepartmentRepository::boxed(pool.clone());
        let exam_names = SqlxExamNameRepository::boxed(pool.clone());
        let courses = SqlxCourseRepository::boxed(pool.clone());
        let log = SqlxModerationLogRepository::boxed(pool.clone());
        let rate_limiter = Arc::new(LoginRateLimiter::new());

        Self {
            user_service: Arc::new(UserService::new(
                users.clone(),
                sessions.clone(),
                SqlxPasswordResetRepository::boxed(pool.clone()),
                mailer.clone(),
                rate_limiter.clone(),
                config.auth.clone(),
            )),
            taxonomy_service: Arc::new(TaxonomyService::new(
                departments.clone(),
                exam_names.clone(),
                courses.clone(),
                cache,
            )),
            question_service: Arc::new(QuestionService::new(
                questions.clone(),
                departments.clone(),
                courses,
                exam_names,
                store.clone(),
                config.storage.clone(),
            )),
            moderation_service: Arc::new(ModerationService::new(questions.clone(), log.clone())),
            admin_service: Arc::new(AdminService::new(
                users,
                sessions,
                questions.clone(),
                departments,
                log,
                store.clone(),
            )),
            download_service: Arc::new(DownloadService::new(
                questions,
                store,
                config.archive.clone(),
            )),
            feedback_service: Arc::new(FeedbackService::new(mailer)),
            rate_limiter,
            storage_config: Arc::new(config.storage.clone()),
            pool,
        }
    }
}

/// Authenticated user extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new("PAYLOAD_TOO_LARGE", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new("SERVICE_UNAVAILABLE", message)
    }

    /// Log the cause and answer with a generic message
    pub fn internal_error(cause: impl std::fmt::Display) -> Self {
        tracing::error!("Internal error: {}", cause);
        Self::new("INTERNAL_ERROR", "Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "CONFLICT" => StatusCode::CONFLICT,
            "PAYLOAD_TOO_LARGE" => StatusCode::PAYLOAD_TOO_LARGE,
            "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
            "SERVICE_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<UserServiceError> for ApiError {
    fn from(e: UserServiceError) -> Self {
        match e {
            UserServiceError::AuthenticationError(msg) => ApiError::unauthorized(msg),
            UserServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            UserServiceError::UserExists(msg) => ApiError::conflict(msg),
            UserServiceError::RegistrationClosed => ApiError::forbidden(e.to_string()),
            UserServiceError::RateLimited(msg) => ApiError::new("RATE_LIMITED", msg),
            UserServiceError::InvalidToken => ApiError::validation_error(e.to_string()),
            UserServiceError::NotFound => ApiError::not_found(e.to_string()),
            UserServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<TaxonomyServiceError> for ApiError {
    fn from(e: TaxonomyServiceError) -> Self {
        match e {
            TaxonomyServiceError::NotFound(_) => ApiError::not_found(e.to_string()),
            TaxonomyServiceError::AlreadyExists(_) | TaxonomyServiceError::InUse(_) => {
                ApiError::conflict(e.to_string())
            }
            TaxonomyServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            TaxonomyServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<QuestionServiceError> for ApiError {
    fn from(e: QuestionServiceError) -> Self {
        match e {
            QuestionServiceError::NotFound => ApiError::not_found(e.to_string()),
            QuestionServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            QuestionServiceError::UnsupportedType(_) => ApiError::validation_error(e.to_string()),
            QuestionServiceError::FileTooLarge { .. } => ApiError::payload_too_large(e.to_string()),
            QuestionServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<ModerationServiceError> for ApiError {
    fn from(e: ModerationServiceError) -> Self {
        match e {
            ModerationServiceError::NotFound => ApiError::not_found(e.to_string()),
            ModerationServiceError::AlreadyReviewed(status) => ApiError::with_details(
                "CONFLICT",
                e.to_string(),
                serde_json::json!({ "status": status }),
            ),
            ModerationServiceError::Forbidden => ApiError::forbidden(e.to_string()),
            ModerationServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            ModerationServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<AdminServiceError> for ApiError {
    fn from(e: AdminServiceError) -> Self {
        match e {
            AdminServiceError::NotFound(_) => ApiError::not_found(e.to_string()),
            AdminServiceError::Forbidden => ApiError::forbidden(e.to_string()),
            AdminServiceError::LastAdmin => ApiError::conflict(e.to_string()),
            AdminServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<DownloadServiceError> for ApiError {
    fn from(e: DownloadServiceError) -> Self {
        match e {
            DownloadServiceError::NotFound | DownloadServiceError::NothingToBundle => {
                ApiError::not_found(e.to_string())
            }
            DownloadServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            DownloadServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<FeedbackServiceError> for ApiError {
    fn from(e: FeedbackServiceError) -> Self {
        match e {
            FeedbackServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            FeedbackServiceError::Email(EmailError::NotConfigured) => {
                ApiError::service_unavailable(EmailError::NotConfigured.to_string())
            }
            FeedbackServiceError::Email(EmailError::InvalidAddress(_)) => {
                ApiError::validation_error(e.to_string())
            }
            FeedbackServiceError::Email(e @ EmailError::SendFailed(_)) => ApiError::internal_error(e),
        }
    }
}

/// Session token from `Authorization: Bearer`, falling back to the `session` cookie
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|s| s.split(';'))
        .find_map(|c| c.trim().strip_prefix("session="))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Client address from proxy headers
pub fn extract_ip_address(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(ip) = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok())
    {
        return Some(ip);
    }

    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

/// Authentication middleware
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_session_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;

    let user = state
        .user_service
        .validate_session(&token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    request.extensions_mut().insert(AuthenticatedUser(user));
    Ok(next.run(request).await)
}

/// Moderator authorization middleware, admins pass too
pub async fn require_moderator(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !user.0.can_moderate() {
        return Err(ApiError::forbidden("Moderator privileges required"));
    }

    Ok(next.run(request).await)
}

/// Admin authorization middleware
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !user.0.is_admin() {
        return Err(ApiError::forbidden("Admin privileges required"));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QuestionStatus, UserRole};
    use axum::http::HeaderValue;
    use proptest::prelude::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(
                header::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_extract_session_token_from_bearer() {
        let h = headers(&[("authorization", "Bearer abc123")]);
        assert_eq!(extract_session_token(&h), Some("abc123".to_string()));
    }

    #[test]
    fn test_extract_session_token_from_cookie() {
        let h = headers(&[("cookie", "theme=dark; session=tok42; other=1")]);
        assert_eq!(extract_session_token(&h), Some("tok42".to_string()));
    }

    #[test]
    fn test_bearer_wins_over_cookie() {
        let h = headers(&[("authorization", "Bearer header"), ("cookie", "session=cookie")]);
        assert_eq!(extract_session_token(&h), Some("header".to_string()));
    }

    #[test]
    fn test_malformed_auth_falls_back_to_cookie() {
        let h = headers(&[("authorization", "Basic dXNlcg=="), ("cookie", "session=c")]);
        assert_eq!(extract_session_token(&h), Some("c".to_string()));
        assert_eq!(extract_session_token(&headers(&[("cookie", "session=")])), None);
        assert_eq!(extract_session_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_extract_ip_address() {
        let h = headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1")]);
        assert_eq!(extract_ip_address(&h), "203.0.113.7".parse().ok());

        let h = headers(&[("x-forwarded-for", "garbage"), ("x-real-ip", "::1")]);
        assert_eq!(extract_ip_address(&h), "::1".parse().ok());

        assert_eq!(extract_ip_address(&HeaderMap::new()), None);
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            ("VALIDATION_ERROR", StatusCode::BAD_REQUEST),
            ("UNAUTHORIZED", StatusCode::UNAUTHORIZED),
            ("FORBIDDEN", StatusCode::FORBIDDEN),
            ("NOT_FOUND", StatusCode::NOT_FOUND),
            ("CONFLICT", StatusCode::CONFLICT),
            ("PAYLOAD_TOO_LARGE", StatusCode::PAYLOAD_TOO_LARGE),
            ("RATE_LIMITED", StatusCode::TOO_MANY_REQUESTS),
            ("SERVICE_UNAVAILABLE", StatusCode::SERVICE_UNAVAILABLE),
            ("INTERNAL_ERROR", StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (code, status) in cases {
            assert_eq!(ApiError::new(code, "x").status(), status, "{}", code);
        }
    }

    #[test]
    fn test_service_error_conversions() {
        let e: ApiError = ModerationServiceError::AlreadyReviewed(QuestionStatus::Approved).into();
        assert_eq!(e.status(), StatusCode::CONFLICT);
        assert_eq!(e.error.details, Some(serde_json::json!({"status": "approved"})));

        let e: ApiError = FeedbackServiceError::Email(EmailError::NotConfigured).into();
        assert_eq!(e.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(e.error.message, "Email service not configured.");

        let e: ApiError = QuestionServiceError::FileTooLarge { max: 10 }.into();
        assert_eq!(e.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let e: ApiError = UserServiceError::InternalError(anyhow::anyhow!("db down")).into();
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.error.message, "Internal server error");
    }

    #[test]
    fn test_error_envelope_shape() {
        let json = serde_json::to_value(ApiError::not_found("Question not found")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"error": {"code": "NOT_FOUND", "message": "Question not found"}})
        );
    }

    fn role_strategy() -> impl Strategy<Value = UserRole> {
        prop_oneof![
            Just(UserRole::Student),
            Just(UserRole::Moderator),
            Just(UserRole::Admin),
        ]
    }

    proptest! {
        #[test]
        fn admins_can_always_moderate(role in role_strategy()) {
            let user = User::new("a@b.co".into(), "h".into(), role);
            prop_assert!(!user.is_admin() || user.can_moderate());
            prop_assert_eq!(user.can_moderate(), role != UserRole::Student);
        }
    }
}
