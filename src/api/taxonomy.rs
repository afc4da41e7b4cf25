//! Taxonomy API endpoints
//!
//! Public (active entries only):
//! - GET /api/v1/departments
//! - GET /api/v1/departments/{id}/courses
//! - GET /api/v1/exam-names
//! - GET /api/v1/courses
//!
//! Admin (every entry, plus CRUD):
//! - GET|POST /api/v1/admin/departments, PUT|DELETE /api/v1/admin/departments/{id}
//! - the same for `exam-names` and `courses`

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};

use crate::api::middleware::{ApiError, AppState};
use crate::models::{
    Course, CreateCourseInput, CreateDepartmentInput, CreateExamNameInput, Department, ExamName,
    UpdateCourseInput, UpdateDepartmentInput, UpdateExamNameInput,
};

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/departments", get(list_active_departments))
        .route("/departments/{id}/courses", get(courses_by_department))
        .route("/exam-names", get(list_active_exam_names))
        .route("/courses", get(list_active_courses))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/departments", get(list_all_departments).post(create_department))
        .route("/departments/{id}", put(update_department).delete(delete_department))
        .route("/exam-names", get(list_all_exam_names).post(create_exam_name))
        .route("/exam-names/{id}", put(update_exam_name).delete(delete_exam_name))
        .route("/courses", get(list_all_courses).post(create_course))
        .route("/courses/{id}", put(update_course).delete(delete_course))
}

// ============================================================================
// Departments
// ============================================================================

async fn list_active_departments(
    State(state): State<AppState>,
) -> Result<Json<Vec<Department>>, ApiError> {
    Ok(Json(state.taxonomy_service.list_departments(true).await?))
}

async fn courses_by_department(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Course>>, ApiError> {
    Ok(Json(state.taxonomy_service.courses_by_department(id).await?))
}

async fn list_all_departments(
    State(state): State<AppState>,
) -> Result<Json<Vec<Department>>, ApiError> {
    Ok(Json(state.taxonomy_service.list_departments(false).await?))
}

async fn create_department(
    State(state): State<AppState>,
    Json(body): Json<CreateDepartmentInput>,
) -> Result<(StatusCode, Json<Department>), ApiError> {
    let department = state.taxonomy_service.create_department(body).await?;
    Ok((StatusCode::CREATED, Json(department)))
}

async fn update_department(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateDepartmentInput>,
) -> Result<Json<Department>, ApiError> {
    Ok(Json(state.taxonomy_service.update_department(id, body).await?))
}

async fn delete_department(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.taxonomy_service.delete_department(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Exam names
// ============================================================================

async fn list_active_exam_names(
    State(state): State<AppState>,
) -> Result<Json<Vec<ExamName>>, ApiError> {
    Ok(Json(state.taxonomy_service.list_exam_names(true).await?))
}

async fn list_all_exam_names(
    State(state): State<AppState>,
) -> Result<Json<Vec<ExamName>>, ApiError> {
    Ok(Json(state.taxonomy_service.list_exam_names(false).await?))
}

async fn create_exam_name(
    State(state): State<AppState>,
    Json(body): Json<CreateExamNameInput>,
) -> Result<(StatusCode, Json<ExamName>), ApiError> {
    let exam_name = state.taxonomy_service.create_exam_name(body).await?;
    Ok((StatusCode::CREATED, Json(exam_name)))
}

async fn update_exam_name(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateExamNameInput>,
) -> Result<Json<ExamName>, ApiError> {
    Ok(Json(state.taxonomy_service.update_exam_name(id, body).await?))
}

async fn delete_exam_name(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.taxonomy_service.delete_exam_name(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Courses
// ============================================================================

async fn list_active_courses(
    State(state): State<AppState>,
) -> Result<Json<Vec<Course>>, ApiError> {
    Ok(Json(state.taxonomy_service.list_courses(true).await?))
}

async fn list_all_courses(State(state): State<AppState>) -> Result<Json<Vec<Course>>, ApiError> {
    Ok(Json(state.taxonomy_service.list_courses(false).await?))
}

async fn create_course(
    State(state): State<AppState>,
    Json(body): Json<CreateCourseInput>,
) -> Result<(StatusCode, Json<Course>), ApiError> {
    let course = state.taxonomy_service.create_course(body).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

async fn update_course(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateCourseInput>,
) -> Result<Json<Course>, ApiError> {
    Ok(Json(state.taxonomy_service.update_course(id, body).await?))
}

async fn delete_course(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.taxonomy_service.delete_course(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
