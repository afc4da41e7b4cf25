//! Shared API response types

use axum::{
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::api::middleware::ApiError;
use crate::models::{QuestionWithMeta, User};
use crate::services::Download;

/// Account as shown to its owner and to admins
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub role: String,
    pub email_verified: bool,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            role: user.role.to_string(),
            email_verified: user.email_verified,
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Strip uploader identity from questions shown in the public archive
pub fn public_question(mut question: QuestionWithMeta) -> QuestionWithMeta {
    question.uploader_email = None;
    question
}

/// Binary body sent as an attachment
pub fn attachment(download: Download) -> Result<Response, ApiError> {
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        download.filename,
        urlencoding::encode(&download.filename)
    ))
    .map_err(ApiError::internal_error)?;
    let content_type =
        HeaderValue::from_str(&download.content_type).map_err(ApiError::internal_error)?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        download.bytes,
    )
        .into_response())
}
