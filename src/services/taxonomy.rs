//! Taxonomy service
//!
//! Departments, exam names and courses: the reference lists behind the
//! browse filters and the upload form. Lists are cached per kind and any
//! write to a kind drops that kind's keys.

use crate::cache::{Cache, CacheLayer};
use crate::db::repositories::{CourseRepository, DepartmentRepository, ExamNameRepository};
use crate::models::{
    Course, CreateCourseInput, CreateDepartmentInput, CreateExamNameInput, Department, ExamName,
    UpdateCourseInput, UpdateDepartmentInput, UpdateExamNameInput,
};
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

const DEPARTMENTS_PATTERN: &str = "taxonomy:departments:*";
const EXAM_NAMES_PATTERN: &str = "taxonomy:exam_names:*";
const COURSES_PATTERN: &str = "taxonomy:courses:*";

const MAX_CODE_LEN: usize = 20;
const MAX_NAME_LEN: usize = 200;

fn list_key(kind: &str, active_only: bool) -> String {
    format!("taxonomy:{}:{}", kind, if active_only { "active" } else { "all" })
}

#[derive(Debug, thiserror::Error)]
pub enum TaxonomyServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} is still used by existing questions or courses")]
    InUse(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

type TaxResult<T> = Result<T, TaxonomyServiceError>;

fn required(field: &str, value: &str, max: usize) -> TaxResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(TaxonomyServiceError::ValidationError(format!(
            "{} is required",
            field
        )));
    }
    if value.chars().count() > max {
        return Err(TaxonomyServiceError::ValidationError(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(value.to_string())
}

/// Codes are compared and stored uppercase
fn normalize_code(field: &str, code: &str) -> TaxResult<String> {
    let code = required(field, code, MAX_CODE_LEN)?.to_uppercase();
    if code.chars().any(char::is_whitespace) {
        return Err(TaxonomyServiceError::ValidationError(format!(
            "{} cannot contain spaces",
            field
        )));
    }
    Ok(code)
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub struct TaxonomyService {
    departments: Arc<dyn DepartmentRepository>,
    exam_names: Arc<dyn ExamNameRepository>,
    courses: Arc<dyn CourseRepository>,
    cache: Arc<Cache>,
    cache_ttl: Duration,
}

impl TaxonomyService {
    pub fn new(
        departments: Arc<dyn DepartmentRepository>,
        exam_names: Arc<dyn ExamNameRepository>,
        courses: Arc<dyn CourseRepository>,
        cache: Arc<Cache>,
    ) -> Self {
        let cache_ttl = cache.default_ttl();
        Self {
            departments,
            exam_names,
            courses,
            cache,
            cache_ttl,
        }
    }

    // ------------------------------------------------------------------
    // Departments
    // ------------------------------------------------------------------

    pub async fn list_departments(&self, active_only: bool) -> TaxResult<Vec<Department>> {
        let key = list_key("departments", active_only);
        if let Some(list) = self.cache.get::<Vec<Department>>(&key).await.ok().flatten() {
            return Ok(list);
        }
        let list = self
            .departments
            .list(active_only)
            .await
            .context("Failed to list departments")?;
        let _ = self.cache.set(&key, &list, self.cache_ttl).await;
        Ok(list)
    }

    pub async fn get_department(&self, id: i64) -> TaxResult<Department> {
        self.departments
            .get_by_id(id)
            .await
            .context("Failed to load department")?
            .ok_or_else(|| TaxonomyServiceError::NotFound("Department".into()))
    }

    pub async fn create_department(&self, input: CreateDepartmentInput) -> TaxResult<Department> {
        let code = normalize_code("Department code", &input.code)?;
        let name = required("Department name", &input.name, MAX_NAME_LEN)?;

        if self
            .departments
            .get_by_code(&code)
            .await
            .context("Failed to check department code")?
            .is_some()
        {
            return Err(TaxonomyServiceError::AlreadyExists(format!("Department {}", code)));
        }

        let now = Utc::now();
        let department = self
            .departments
            .create(&Department {
                id: 0,
                code,
                name,
                description: optional_text(input.description),
                active: input.active.unwrap_or(true),
                created_at: now,
                updated_at: now,
            })
            .await
            .context("Failed to create department")?;

        self.invalidate(DEPARTMENTS_PATTERN).await;
        tracing::info!("Created department {} ({})", department.code, department.id);
        Ok(department)
    }

    /// Partial update; `description: Some("")` clears the description.
    pub async fn update_department(
        &self,
        id: i64,
        input: UpdateDepartmentInput,
    ) -> TaxResult<Department> {
        let mut department = self.get_department(id).await?;

        if let Some(code) = input.code {
            let code = normalize_code("Department code", &code)?;
            if code != department.code {
                if let Some(other) = self
                    .departments
                    .get_by_code(&code)
                    .await
                    .context("Failed to check department code")?
                {
                    if other.id != id {
                        return Err(TaxonomyServiceError::AlreadyExists(format!(
                            "Department {}",
                            code
                        )));
                    }
                }
                department.code = code;
            }
        }
        if let Some(name) = input.name {
            department.name = required("Department name", &name, MAX_NAME_LEN)?;
        }
        if input.description.is_some() {
            department.description = optional_text(input.description);
        }
        if let Some(active) = input.active {
            department.active = active;
        }
        department.updated_at = Utc::now();

        let updated = self
            .departments
            .update(&department)
            .await
            .context("Failed to update department")?;
        self.invalidate(DEPARTMENTS_PATTERN).await;
        Ok(updated)
    }

    pub async fn delete_department(&self, id: i64) -> TaxResult<()> {
        let department = self.get_department(id).await?;
        if self
            .departments
            .is_referenced(id)
            .await
            .context("Failed to check department references")?
        {
            return Err(TaxonomyServiceError::InUse(format!("Department {}", department.code)));
        }
        self.departments
            .delete(id)
            .await
            .context("Failed to delete department")?;
        self.invalidate(DEPARTMENTS_PATTERN).await;
        self.invalidate(COURSES_PATTERN).await;
        tracing::info!("Deleted department {}", department.code);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Exam names
    // ------------------------------------------------------------------

    pub async fn list_exam_names(&self, active_only: bool) -> TaxResult<Vec<ExamName>> {
        let key = list_key("exam_names", active_only);
        if let Some(list) = self.cache.get::<Vec<ExamName>>(&key).await.ok().flatten() {
            return Ok(list);
        }
        let list = self
            .exam_names
            .list(active_only)
            .await
            .context("Failed to list exam names")?;
        let _ = self.cache.set(&key, &list, self.cache_ttl).await;
        Ok(list)
    }

    pub async fn get_exam_name(&self, id: i64) -> TaxResult<ExamName> {
        self.exam_names
            .get_by_id(id)
            .await
            .context("Failed to load exam name")?
            .ok_or_else(|| TaxonomyServiceError::NotFound("Exam name".into()))
    }

    pub async fn create_exam_name(&self, input: CreateExamNameInput) -> TaxResult<ExamName> {
        let name = required("Exam name", &input.name, MAX_NAME_LEN)?;
        if self
            .exam_names
            .get_by_name(&name)
            .await
            .context("Failed to check exam name")?
            .is_some()
        {
            return Err(TaxonomyServiceError::AlreadyExists(format!("Exam name {}", name)));
        }

        let now = Utc::now();
        let exam_name = self
            .exam_names
            .create(&ExamName {
                id: 0,
                name,
                active: input.active.unwrap_or(true),
                created_at: now,
                updated_at: now,
            })
            .await
            .context("Failed to create exam name")?;
        self.invalidate(EXAM_NAMES_PATTERN).await;
        Ok(exam_name)
    }

    pub async fn update_exam_name(&self, id: i64, input: UpdateExamNameInput) -> TaxResult<ExamName> {
        let mut exam_name = self.get_exam_name(id).await?;

        if let Some(name) = input.name {
            let name = required("Exam name", &name, MAX_NAME_LEN)?;
            if let Some(other) = self
                .exam_names
                .get_by_name(&name)
                .await
                .context("Failed to check exam name")?
            {
                if other.id != id {
                    return Err(TaxonomyServiceError::AlreadyExists(format!(
                        "Exam name {}",
                        name
                    )));
                }
            }
            exam_name.name = name;
        }
        if let Some(active) = input.active {
            exam_name.active = active;
        }
        exam_name.updated_at = Utc::now();

        let updated = self
            .exam_names
            .update(&exam_name)
            .await
            .context("Failed to update exam name")?;
        self.invalidate(EXAM_NAMES_PATTERN).await;
        Ok(updated)
    }

    pub async fn delete_exam_name(&self, id: i64) -> TaxResult<()> {
        let exam_name = self.get_exam_name(id).await?;
        if self
            .exam_names
            .is_referenced(id)
            .await
            .context("Failed to check exam name references")?
        {
            return Err(TaxonomyServiceError::InUse(format!("Exam name {}", exam_name.name)));
        }
        self.exam_names
            .delete(id)
            .await
            .context("Failed to delete exam name")?;
        self.invalidate(EXAM_NAMES_PATTERN).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Courses
    // ------------------------------------------------------------------

    pub async fn list_courses(&self, active_only: bool) -> TaxResult<Vec<Course>> {
        let key = list_key("courses", active_only);
        if let Some(list) = self.cache.get::<Vec<Course>>(&key).await.ok().flatten() {
            return Ok(list);
        }
        let list = self
            .courses
            .list(active_only)
            .await
            .context("Failed to list courses")?;
        let _ = self.cache.set(&key, &list, self.cache_ttl).await;
        Ok(list)
    }

    /// Active courses of one department, ordered by code
    pub async fn courses_by_department(&self, department_id: i64) -> TaxResult<Vec<Course>> {
        self.get_department(department_id).await?;

        let key = format!("taxonomy:courses:dept:{}", department_id);
        if let Some(list) = self.cache.get::<Vec<Course>>(&key).await.ok().flatten() {
            return Ok(list);
        }
        let list = self
            .courses
            .list_by_department(department_id, true)
            .await
            .context("Failed to list courses for department")?;
        let _ = self.cache.set(&key, &list, self.cache_ttl).await;
        Ok(list)
    }

    pub async fn get_course(&self, id: i64) -> TaxResult<Course> {
        self.courses
            .get_by_id(id)
            .await
            .context("Failed to load course")?
            .ok_or_else(|| TaxonomyServiceError::NotFound("Course".into()))
    }

    pub async fn create_course(&self, input: CreateCourseInput) -> TaxResult<Course> {
        let code = normalize_code("Course code", &input.code)?;
        let title = required("Course title", &input.title, MAX_NAME_LEN)?;
        self.require_department(input.department_id).await?;

        if self
            .courses
            .get_by_code(&code)
            .await
            .context("Failed to check course code")?
            .is_some()
        {
            return Err(TaxonomyServiceError::AlreadyExists(format!("Course {}", code)));
        }

        let now = Utc::now();
        let course = self
            .courses
            .create(&Course {
                id: 0,
                code,
                title,
                department_id: input.department_id,
                active: input.active.unwrap_or(true),
                created_at: now,
                updated_at: now,
            })
            .await
            .context("Failed to create course")?;
        self.invalidate(COURSES_PATTERN).await;
        tracing::info!("Created course {} ({})", course.code, course.id);
        Ok(course)
    }

    pub async fn update_course(&self, id: i64, input: UpdateCourseInput) -> TaxResult<Course> {
        let mut course = self.get_course(id).await?;

        if let Some(code) = input.code {
            let code = normalize_code("Course code", &code)?;
            if code != course.code {
                if let Some(other) = self
                    .courses
                    .get_by_code(&code)
                    .await
                    .context("Failed to check course code")?
                {
                    if other.id != id {
                        return Err(TaxonomyServiceError::AlreadyExists(format!(
                            "Course {}",
                            code
                        )));
                    }
                }
                course.code = code;
            }
        }
        if let Some(title) = input.title {
            course.title = required("Course title", &title, MAX_NAME_LEN)?;
        }
        if let Some(department_id) = input.department_id {
            self.require_department(department_id).await?;
            course.department_id = department_id;
        }
        if let Some(active) = input.active {
            course.active = active;
        }
        course.updated_at = Utc::now();

        let updated = self
            .courses
            .update(&course)
            .await
            .context("Failed to update course")?;
        self.invalidate(COURSES_PATTERN).await;
        Ok(updated)
    }

    pub async fn delete_course(&self, id: i64) -> TaxResult<()> {
        let course = self.get_course(id).await?;
        if self
            .courses
            .is_referenced(id)
            .await
            .context("Failed to check course references")?
        {
            return Err(TaxonomyServiceError::InUse(format!("Course {}", course.code)));
        }
        self.courses
            .delete(id)
            .await
            .context("Failed to delete course")?;
        self.invalidate(COURSES_PATTERN).await;
        Ok(())
    }

    async fn require_department(&self, id: i64) -> TaxResult<()> {
        match self.get_department(id).await {
            Err(TaxonomyServiceError::NotFound(_)) => Err(TaxonomyServiceError::ValidationError(
                format!("Department {} does not exist", id),
            )),
            other => other.map(|_| ()),
        }
    }

    async fn invalidate(&self, pattern: &str) {
        if let Err(e) = self.cache.delete_pattern(pattern).await {
            tracing::warn!("Failed to invalidate cache {}: {}", pattern, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::create_test_cache;
    use crate::db::repositories::{
        SqlxCourseRepository, SqlxDepartmentRepository, SqlxExamNameRepository,
    };
    use crate::db::{create_test_pool, migrations};

    async fn setup() -> TaxonomyService {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        TaxonomyService::new(
            SqlxDepartmentRepository::boxed(pool.clone()),
            SqlxExamNameRepository::boxed(pool.clone()),
            SqlxCourseRepository::boxed(pool.clone()),
            create_test_cache(),
        )
    }

    fn department(code: &str, name: &str) -> CreateDepartmentInput {
        CreateDepartmentInput {
            code: code.into(),
            name: name.into(),
            description: None,
            active: None,
        }
    }

    fn course(code: &str, department_id: i64) -> CreateCourseInput {
        CreateCourseInput {
            code: code.into(),
            title: format!("{} title", code),
            department_id,
            active: None,
        }
    }

    #[tokio::test]
    async fn test_create_department_normalizes_and_rejects_duplicates() {
        let service = setup().await;
        let cse = service
            .create_department(department(" cse ", "Computer Science"))
            .await
            .unwrap();
        assert_eq!(cse.code, "CSE");
        assert!(cse.active);

        assert!(matches!(
            service.create_department(department("CSE", "Again")).await,
            Err(TaxonomyServiceError::AlreadyExists(_))
        ));
        assert!(matches!(
            service.create_department(department("", "No code")).await,
            Err(TaxonomyServiceError::ValidationError(_))
        ));
        assert!(matches!(
            service.create_department(department("EEE", "   ")).await,
            Err(TaxonomyServiceError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_public_list_hides_inactive_and_cache_is_invalidated() {
        let service = setup().await;
        let cse = service
            .create_department(department("CSE", "Computer Science"))
            .await
            .unwrap();
        service
            .create_department(department("EEE", "Electrical"))
            .await
            .unwrap();

        assert_eq!(service.list_departments(true).await.unwrap().len(), 2);

        service
            .update_department(
                cse.id,
                UpdateDepartmentInput {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let active = service.list_departments(true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].code, "EEE");
        assert_eq!(service.list_departments(false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_department_description_clear_and_code_conflict() {
        let service = setup().await;
        let cse = service
            .create_department(CreateDepartmentInput {
                description: Some("Computing".into()),
                ..department("CSE", "Computer Science")
            })
            .await
            .unwrap();
        service
            .create_department(department("EEE", "Electrical"))
            .await
            .unwrap();

        let updated = service
            .update_department(
                cse.id,
                UpdateDepartmentInput {
                    description: Some("".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.description.is_none());

        assert!(matches!(
            service
                .update_department(
                    cse.id,
                    UpdateDepartmentInput {
                        code: Some("eee".into()),
                        ..Default::default()
                    },
                )
                .await,
            Err(TaxonomyServiceError::AlreadyExists(_))
        ));
        assert!(matches!(
            service
                .update_department(999, UpdateDepartmentInput::default())
                .await,
            Err(TaxonomyServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_course_requires_existing_department() {
        let service = setup().await;
        assert!(matches!(
            service.create_course(course("CSE101", 42)).await,
            Err(TaxonomyServiceError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_courses_by_department_sorted_and_active() {
        let service = setup().await;
        let cse = service
            .create_department(department("CSE", "Computer Science"))
            .await
            .unwrap();
        let eee = service
            .create_department(department("EEE", "Electrical"))
            .await
            .unwrap();
        service.create_course(course("CSE201", cse.id)).await.unwrap();
        service.create_course(course("CSE101", cse.id)).await.unwrap();
        service.create_course(course("EEE101", eee.id)).await.unwrap();
        service
            .create_course(CreateCourseInput {
                active: Some(false),
                ..course("CSE050", cse.id)
            })
            .await
            .unwrap();

        let codes: Vec<String> = service
            .courses_by_department(cse.id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.code)
            .collect();
        assert_eq!(codes, vec!["CSE101", "CSE201"]);

        // a new course shows up despite the cached list
        service.create_course(course("CSE102", cse.id)).await.unwrap();
        assert_eq!(service.courses_by_department(cse.id).await.unwrap().len(), 3);

        assert!(matches!(
            service.courses_by_department(999).await,
            Err(TaxonomyServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_department_in_use() {
        let service = setup().await;
        let cse = service
            .create_department(department("CSE", "Computer Science"))
            .await
            .unwrap();
        let c = service.create_course(course("CSE101", cse.id)).await.unwrap();

        assert!(matches!(
            service.delete_department(cse.id).await,
            Err(TaxonomyServiceError::InUse(_))
        ));

        service.delete_course(c.id).await.unwrap();
        service.delete_department(cse.id).await.unwrap();
        assert!(service.list_departments(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exam_names_crud() {
        let service = setup().await;
        let midterm = service
            .create_exam_name(CreateExamNameInput {
                name: "Midterm".into(),
                active: None,
            })
            .await
            .unwrap();
        assert!(matches!(
            service
                .create_exam_name(CreateExamNameInput {
                    name: "midterm".into(),
                    active: None,
                })
                .await,
            Err(TaxonomyServiceError::AlreadyExists(_))
        ));

        let renamed = service
            .update_exam_name(
                midterm.id,
                UpdateExamNameInput {
                    name: Some("Mid-term".into()),
                    active: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Mid-term");
        assert_eq!(service.list_exam_names(true).await.unwrap()[0].name, "Mid-term");

        service.delete_exam_name(midterm.id).await.unwrap();
        assert!(service.list_exam_names(false).await.unwrap().is_empty());
        assert!(matches!(
            service.delete_exam_name(midterm.id).await,
            Err(TaxonomyServiceError::NotFound(_))
        ));
    }
}
