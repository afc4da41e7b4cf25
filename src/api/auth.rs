//! Authentication API endpoints
//!
//! - POST /api/v1/auth/register - Create an account (first account becomes admin)
//! - POST /api/v1/auth/login - Open a session
//! - POST /api/v1/auth/logout - Close the current session
//! - POST /api/v1/auth/forgot-password - Mail a reset token
//! - POST /api/v1/auth/reset-password - Set a new password with a reset token
//! - GET /api/v1/auth/me - Current user
//! - POST /api/v1/auth/change-password - Change password while signed in

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{
    extract_ip_address, extract_session_token, ApiError, AppState, AuthenticatedUser,
};
use crate::api::responses::{MessageResponse, UserResponse};
use crate::models::Session;
use crate::services::{LoginInput, RegisterInput, ResetPasswordInput, UserServiceError};

const CLEAR_SESSION_COOKIE: &str = "session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0";

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub token: String,
}

/// Build protected auth routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_current_user))
        .route("/change-password", post(change_password))
}

/// Build public auth routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
}

fn session_cookie(session: &Session, days: i64) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(&format!(
        "session={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        session.id,
        days * 24 * 60 * 60
    ))
    .map_err(ApiError::internal_error)
}

/// POST /api/v1/auth/register
async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let password = body.password.clone();
    let user = state
        .user_service
        .register(RegisterInput::new(body.email, body.password))
        .await?;

    let (session, user) = state
        .user_service
        .login(
            LoginInput::new(user.email, password),
            extract_ip_address(&headers),
        )
        .await?;

    let cookie = session_cookie(&session, state.user_service.session_days())?;
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            user: user.into(),
            token: session.id,
        }),
    ))
}

/// POST /api/v1/auth/login
async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (session, user) = state
        .user_service
        .login(
            LoginInput::new(body.email, body.password),
            extract_ip_address(&headers),
        )
        .await?;

    let cookie = session_cookie(&session, state.user_service.session_days())?;
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            user: user.into(),
            token: session.id,
        }),
    ))
}

/// POST /api/v1/auth/logout
///
/// Always clears the cookie, signed in or not.
async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(token) = extract_session_token(&headers) {
        state.user_service.logout(&token).await?;
    }

    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, HeaderValue::from_static(CLEAR_SESSION_COOKIE))],
    ))
}

/// GET /api/v1/auth/me
async fn get_current_user(user: AuthenticatedUser) -> Json<UserResponse> {
    Json(user.0.into())
}

/// POST /api/v1/auth/forgot-password
///
/// Answers the same whether or not the email is registered.
async fn forgot_password(
    State(state): State<AppState>,
    Json(body): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.user_service.forgot_password(&body.email).await?;
    Ok(Json(MessageResponse::new(
        "If the email is registered, a reset token has been sent.",
    )))
}

/// POST /api/v1/auth/reset-password
async fn reset_password(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .user_service
        .reset_password(ResetPasswordInput {
            token: body.token,
            password: body.password,
            confirm_password: body.confirm_password,
        })
        .await?;
    Ok(Json(MessageResponse::new("Password has been reset.")))
}

/// POST /api/v1/auth/change-password
async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .user_service
        .change_password(user.0.id, &body.current_password, &body.new_password)
        .await
        .map_err(|e| match e {
            // a wrong current password is a form error, not a lost session
            UserServiceError::AuthenticationError(msg) => ApiError::validation_error(msg),
            other => other.into(),
        })?;
    Ok(Json(MessageResponse::new("Password changed.")))
}
