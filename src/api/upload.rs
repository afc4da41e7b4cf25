//! Upload API endpoint
//!
//! POST /api/v1/questions/upload takes multipart/form-data with a `file`
//! part and the question metadata as text parts:
//! `department_id`, `course_id`, `exam_name_id`, `exam_year`, and the
//! optional `session`, `description` and `tags` (comma-separated).

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use std::str::FromStr;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{ExamSession, Question};
use crate::services::question::parse_tag_list;
use crate::services::{QuestionInput, UploadedFile};

/// Room for the metadata parts and multipart framing on top of the file
const FORM_OVERHEAD: usize = 64 * 1024;

pub fn router(max_file_size: u64) -> Router<AppState> {
    let limit = usize::try_from(max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(FORM_OVERHEAD);
    Router::new()
        .route("/upload", post(upload_question))
        .layer(DefaultBodyLimit::max(limit))
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large("Upload exceeds the maximum file size")
    } else {
        ApiError::validation_error(format!("Malformed multipart body: {}", e.body_text()))
    }
}

fn parse_field<T: FromStr>(name: &str, value: &str) -> Result<Option<T>, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| ApiError::validation_error(format!("Invalid {}", name)))
}

/// Form fields collected from the multipart stream
#[derive(Debug, Default)]
struct UploadForm {
    input: QuestionInput,
    file: Option<UploadedFile>,
}

impl UploadForm {
    fn set_text(&mut self, name: &str, value: &str) -> Result<(), ApiError> {
        match name {
            "department_id" => self.input.department_id = parse_field(name, value)?,
            "course_id" => self.input.course_id = parse_field(name, value)?,
            "exam_name_id" => self.input.exam_name_id = parse_field(name, value)?,
            "exam_year" => {
                self.input.exam_year = parse_field(name, value)
                    .map_err(|_| ApiError::validation_error("Invalid year"))?
            }
            "session" => self.input.session = parse_field::<ExamSession>(name, value)?,
            "description" => self.input.description = Some(value.to_string()),
            "tags" => self.input.tags = parse_tag_list(value),
            _ => {}
        }
        Ok(())
    }
}

/// POST /api/v1/questions/upload
///
/// Requires authentication. Created questions start out pending.
async fn upload_question(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Question>), ApiError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            let content_type = field
                .content_type()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "application/octet-stream".to_string());
            let bytes = field.bytes().await.map_err(multipart_error)?;
            form.file = Some(UploadedFile {
                content_type,
                bytes: bytes.to_vec(),
            });
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            form.set_text(&name, &value)?;
        }
    }

    let file = form
        .file
        .ok_or_else(|| ApiError::validation_error("No file provided"))?;

    let question = state
        .question_service
        .upload(&user.0, &form.input, file)
        .await?;

    Ok((StatusCode::CREATED, Json(question)))
}
