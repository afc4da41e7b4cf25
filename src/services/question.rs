//! Question service
//!
//! Contributor uploads and the public archive:
//! - metadata validation against the taxonomy
//! - the upload flow (validate, store image, insert `pending` row)
//! - public browse / detail over approved questions
//! - a contributor's own submissions in any state

use crate::config::StorageConfig;
use crate::db::repositories::{
    CourseRepository, DepartmentRepository, ExamNameRepository, QuestionOrder, QuestionRepository,
};
use crate::models::{
    ExamSession, ListParams, NewQuestion, PagedResult, Question, QuestionFilter, QuestionStatus,
    QuestionWithMeta, User,
};
use crate::services::storage::{question_object_key, ObjectStore, StoredObject};
use anyhow::Context;
use chrono::{Datelike, Utc};
use std::collections::HashSet;
use std::sync::Arc;

pub const MIN_EXAM_YEAR: i32 = 2000;
pub const MAX_TAGS: usize = 20;
pub const MAX_TAG_LEN: usize = 50;
pub const MAX_DESCRIPTION_LEN: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum QuestionServiceError {
    #[error("Question not found")]
    NotFound,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("File too large. Maximum size: {max} bytes")]
    FileTooLarge { max: u64 },

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

type QResult<T> = Result<T, QuestionServiceError>;

fn invalid(msg: impl Into<String>) -> QuestionServiceError {
    QuestionServiceError::ValidationError(msg.into())
}

/// Metadata supplied with an upload, before validation
#[derive(Debug, Clone, Default)]
pub struct QuestionInput {
    pub department_id: Option<i64>,
    pub course_id: Option<i64>,
    pub exam_name_id: Option<i64>,
    pub exam_year: Option<i32>,
    pub session: Option<ExamSession>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// Image bytes received from the client
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Metadata that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuestion {
    pub department_id: i64,
    pub course_id: i64,
    pub exam_name_id: i64,
    pub course_code: String,
    pub exam_year: i32,
    pub session: Option<ExamSession>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// Check an exam year against `2000..=current_year + 1`.
pub fn validate_exam_year(year: i32, current_year: i32) -> Result<i32, String> {
    if year < MIN_EXAM_YEAR {
        return Err("Year must be 2000 or later".to_string());
    }
    if year > current_year + 1 {
        return Err("Invalid year".to_string());
    }
    Ok(year)
}

/// Trim tags, drop blanks and case-insensitive duplicates, enforce limits.
pub fn normalize_tags<S: AsRef<str>>(raw: &[S]) -> Result<Vec<String>, String> {
    let mut seen = HashSet::new();
    let mut tags = Vec::new();

    for tag in raw {
        let tag = tag.as_ref().trim();
        if tag.is_empty() {
            continue;
        }
        if tag.chars().count() > MAX_TAG_LEN {
            return Err(format!("Tags must be at most {} characters", MAX_TAG_LEN));
        }
        if seen.insert(tag.to_lowercase()) {
            tags.push(tag.to_string());
        }
    }

    if tags.len() > MAX_TAGS {
        return Err(format!("At most {} tags are allowed", MAX_TAGS));
    }
    Ok(tags)
}

/// Split a comma-separated tag field
pub fn parse_tag_list(raw: &str) -> Vec<String> {
    raw.split(',').map(|t| t.trim().to_string()).collect()
}

pub struct QuestionService {
    questions: Arc<dyn QuestionRepository>,
    departments: Arc<dyn DepartmentRepository>,
    courses: Arc<dyn CourseRepository>,
    exam_names: Arc<dyn ExamNameRepository>,
    store: Arc<dyn ObjectStore>,
    storage: StorageConfig,
}

impl QuestionService {
    pub fn new(
        questions: Arc<dyn QuestionRepository>,
        departments: Arc<dyn DepartmentRepository>,
        courses: Arc<dyn CourseRepository>,
        exam_names: Arc<dyn ExamNameRepository>,
        store: Arc<dyn ObjectStore>,
        storage: StorageConfig,
    ) -> Self {
        Self {
            questions,
            departments,
            courses,
            exam_names,
            store,
            storage,
        }
    }

    /// Validate upload metadata against the taxonomy tables.
    pub async fn validate(&self, input: &QuestionInput) -> QResult<ValidatedQuestion> {
        let department_id = input.department_id.ok_or_else(|| invalid("Department is required"))?;
        let course_id = input.course_id.ok_or_else(|| invalid("Course is required"))?;
        let exam_name_id = input.exam_name_id.ok_or_else(|| invalid("Exam name is required"))?;
        let exam_year = input.exam_year.ok_or_else(|| invalid("Exam year is required"))?;
        let exam_year = validate_exam_year(exam_year, Utc::now().year()).map_err(invalid)?;

        let description = input
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        if description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
        {
            return Err(invalid(format!(
                "Description must be at most {} characters",
                MAX_DESCRIPTION_LEN
            )));
        }
        let tags = normalize_tags(&input.tags).map_err(invalid)?;

        if self
            .departments
            .get_by_id(department_id)
            .await
            .context("Failed to load department")?
            .is_none()
        {
            return Err(invalid("Selected department does not exist"));
        }
        if self
            .exam_names
            .get_by_id(exam_name_id)
            .await
            .context("Failed to load exam name")?
            .is_none()
        {
            return Err(invalid("Selected exam name does not exist"));
        }
        let course = self
            .courses
            .get_by_id(course_id)
            .await
            .context("Failed to load course")?
            .ok_or_else(|| invalid("Selected course does not exist"))?;
        if course.department_id != department_id {
            return Err(invalid("Course does not belong to the selected department"));
        }

        Ok(ValidatedQuestion {
            department_id,
            course_id,
            exam_name_id,
            course_code: course.code,
            exam_year,
            session: input.session,
            description,
            tags,
        })
    }

    /// Validate and insert a question for an image that is already stored.
    pub async fn create(
        &self,
        user: &User,
        input: &QuestionInput,
        image: &StoredObject,
    ) -> QResult<Question> {
        let validated = self.validate(input).await?;
        self.insert(user, validated, image).await
    }

    /// Full upload: metadata first, then file checks, then store and insert.
    ///
    /// The stored object is removed again if the insert fails.
    pub async fn upload(
        &self,
        user: &User,
        input: &QuestionInput,
        file: UploadedFile,
    ) -> QResult<Question> {
        let validated = self.validate(input).await?;

        if !self.storage.is_type_allowed(&file.content_type) {
            return Err(QuestionServiceError::UnsupportedType(file.content_type));
        }
        if file.bytes.is_empty() {
            return Err(invalid("Uploaded file is empty"));
        }
        if file.bytes.len() as u64 > self.storage.max_file_size {
            return Err(QuestionServiceError::FileTooLarge {
                max: self.storage.max_file_size,
            });
        }

        let key = question_object_key(StorageConfig::extension_for(&file.content_type));
        let stored = self
            .store
            .put(&key, &file.bytes)
            .await
            .context("Failed to store uploaded image")?;

        match self.insert(user, validated, &stored).await {
            Ok(question) => {
                tracing::info!(
                    "User {} uploaded question {} ({} bytes)",
                    user.id,
                    question.id,
                    stored.size
                );
                Ok(question)
            }
            Err(e) => {
                if let Err(cleanup) = self.store.delete(&stored.key).await {
                    tracing::warn!("Failed to remove orphaned object {}: {}", stored.key, cleanup);
                }
                Err(e)
            }
        }
    }

    async fn insert(
        &self,
        user: &User,
        validated: ValidatedQuestion,
        image: &StoredObject,
    ) -> QResult<Question> {
        let question = self
            .questions
            .create(&NewQuestion {
                image_url: image.url.clone(),
                storage_key: image.key.clone(),
                exam_year: validated.exam_year,
                session: validated.session,
                department_id: validated.department_id,
                exam_name_id: validated.exam_name_id,
                course_id: validated.course_id,
                course_code: Some(validated.course_code),
                description: validated.description,
                tags: validated.tags,
                created_by: user.id,
            })
            .await
            .context("Failed to insert question")?;
        Ok(question)
    }

    /// Approved questions matching the filter, newest first
    pub async fn browse(
        &self,
        filter: QuestionFilter,
        params: &ListParams,
    ) -> QResult<PagedResult<QuestionWithMeta>> {
        let filter = QuestionFilter {
            status: Some(QuestionStatus::Approved),
            created_by: None,
            ..filter
        };
        Ok(self
            .questions
            .list(&filter, QuestionOrder::NewestFirst, params)
            .await
            .context("Failed to browse questions")?)
    }

    /// An approved question; anything else is reported as missing
    pub async fn get_public(&self, id: i64) -> QResult<QuestionWithMeta> {
        match self
            .questions
            .get_with_meta(id)
            .await
            .context("Failed to load question")?
        {
            Some(q) if q.question.status == QuestionStatus::Approved => Ok(q),
            _ => Err(QuestionServiceError::NotFound),
        }
    }

    /// The caller's own uploads in every state, newest first
    pub async fn my_submissions(
        &self,
        user: &User,
        params: &ListParams,
    ) -> QResult<PagedResult<QuestionWithMeta>> {
        let filter = QuestionFilter {
            created_by: Some(user.id),
            ..Default::default()
        };
        Ok(self
            .questions
            .list(&filter, QuestionOrder::NewestFirst, params)
            .await
            .context("Failed to list submissions")?)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::db::repositories::{ReviewUpdate, SqlxQuestionRepository};
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use crate::models::ModerationLogEntry;
    use crate::services::storage::LocalObjectStore;
    use async_trait::async_trait;
    use proptest::prelude::*;

    async fn setup() -> (DynDatabasePool, tempfile::TempDir, QuestionService, Seed) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), "/uploads").boxed();
        let service = question_service(&pool, store);
        let seed = seed(&pool).await;
        (pool, dir, service, seed)
    }

    async fn approve(pool: &DynDatabasePool, id: i64, reviewer: i64) {
        let repo = SqlxQuestionRepository::new(pool.clone());
        assert!(repo
            .review(
                id,
                QuestionStatus::Pending,
                &ReviewUpdate {
                    status: QuestionStatus::Approved,
                    reviewer_id: reviewer,
                    rejection_reason: None,
                    reviewed_at: Utc::now(),
                },
            )
            .await
            .unwrap());
    }

    fn stored_files(dir: &tempfile::TempDir) -> usize {
        std::fs::read_dir(dir.path().join("questions"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_upload_creates_pending_question() {
        let (_pool, dir, service, seed) = setup().await;
        let question = service
            .upload(&seed.contributor, &seed.input(2023), png(b"\x89PNG data"))
            .await
            .unwrap();

        assert_eq!(question.status, QuestionStatus::Pending);
        assert_eq!(question.created_by, seed.contributor.id);
        assert_eq!(question.course_code.as_deref(), Some("CSE101"));
        assert_eq!(question.description.as_deref(), Some("Recursion and loops"));
        assert_eq!(question.tags, vec!["loops", "recursion"]);
        assert!(question.image_url.starts_with("/uploads/questions/"));
        assert!(question.storage_key.ends_with(".png"));
        assert_eq!(stored_files(&dir), 1);
    }

    #[tokio::test]
    async fn test_metadata_checked_before_bytes_are_stored() {
        let (_pool, dir, service, seed) = setup().await;
        let mut input = seed.input(2023);
        input.course_id = Some(999);
        let err = service
            .upload(&seed.contributor, &input, png(b"data"))
            .await
            .unwrap_err();
        assert!(matches!(err, QuestionServiceError::ValidationError(_)));
        assert_eq!(stored_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_course_must_belong_to_department() {
        let (_pool, _dir, service, seed) = setup().await;
        let mut input = seed.input(2023);
        input.department_id = Some(seed.other_department.id);
        let err = service.validate(&input).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: Course does not belong to the selected department"
        );
    }

    #[tokio::test]
    async fn test_year_bounds() {
        let (_pool, _dir, service, seed) = setup().await;
        let err = service.validate(&seed.input(1999)).await.unwrap_err();
        assert_eq!(err.to_string(), "Validation error: Year must be 2000 or later");

        let next = Utc::now().year() + 1;
        assert!(service.validate(&seed.input(next)).await.is_ok());
        let err = service.validate(&seed.input(next + 1)).await.unwrap_err();
        assert_eq!(err.to_string(), "Validation error: Invalid year");
    }

    #[tokio::test]
    async fn test_missing_required_fields() {
        let (_pool, _dir, service, seed) = setup().await;
        let mut input = seed.input(2023);
        input.exam_name_id = None;
        assert!(matches!(
            service.validate(&input).await,
            Err(QuestionServiceError::ValidationError(_))
        ));
        assert!(matches!(
            service.validate(&QuestionInput::default()).await,
            Err(QuestionServiceError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_file_type_and_size() {
        let (_pool, dir, service, seed) = setup().await;
        let pdf = UploadedFile {
            content_type: "application/pdf".into(),
            bytes: b"%PDF".to_vec(),
        };
        assert!(matches!(
            service.upload(&seed.contributor, &seed.input(2023), pdf).await,
            Err(QuestionServiceError::UnsupportedType(_))
        ));

        let big = png(&vec![0u8; (StorageConfig::default().max_file_size + 1) as usize]);
        assert!(matches!(
            service.upload(&seed.contributor, &seed.input(2023), big).await,
            Err(QuestionServiceError::FileTooLarge { .. })
        ));
        assert_eq!(stored_files(&dir), 0);
    }

    /// Repository whose inserts always fail
    struct FailingInsert(Arc<dyn QuestionRepository>);

    #[async_trait]
    impl QuestionRepository for FailingInsert {
        async fn create(&self, _question: &NewQuestion) -> anyhow::Result<Question> {
            anyhow::bail!("disk full")
        }
        async fn get_by_id(&self, id: i64) -> anyhow::Result<Option<Question>> {
            self.0.get_by_id(id).await
        }
        async fn get_with_meta(&self, id: i64) -> anyhow::Result<Option<QuestionWithMeta>> {
            self.0.get_with_meta(id).await
        }
        async fn list(
            &self,
            filter: &QuestionFilter,
            order: QuestionOrder,
            params: &ListParams,
        ) -> anyhow::Result<PagedResult<QuestionWithMeta>> {
            self.0.list(filter, order, params).await
        }
        async fn list_by_ids(
            &self,
            ids: &[i64],
            filter: &QuestionFilter,
        ) -> anyhow::Result<Vec<Question>> {
            self.0.list_by_ids(ids, filter).await
        }
        async fn review(
            &self,
            id: i64,
            expected: QuestionStatus,
            update: &ReviewUpdate,
        ) -> anyhow::Result<bool> {
            self.0.review(id, expected, update).await
        }
        async fn delete(&self, id: i64, entry: &ModerationLogEntry) -> anyhow::Result<bool> {
            self.0.delete(id, entry).await
        }
        async fn count(&self, filter: &QuestionFilter) -> anyhow::Result<i64> {
            self.0.count(filter).await
        }
        async fn count_by_status(&self) -> anyhow::Result<Vec<(QuestionStatus, i64)>> {
            self.0.count_by_status().await
        }
    }

    #[tokio::test]
    async fn test_failed_insert_removes_stored_object() {
        let (pool, dir, _service, seed) = setup().await;
        let failing = QuestionService::new(
            Arc::new(FailingInsert(SqlxQuestionRepository::boxed(pool.clone()))),
            crate::db::repositories::SqlxDepartmentRepository::boxed(pool.clone()),
            crate::db::repositories::SqlxCourseRepository::boxed(pool.clone()),
            crate::db::repositories::SqlxExamNameRepository::boxed(pool.clone()),
            LocalObjectStore::new(dir.path(), "/uploads").boxed(),
            StorageConfig::default(),
        );

        let err = failing
            .upload(&seed.contributor, &seed.input(2023), png(b"data"))
            .await
            .unwrap_err();
        assert!(matches!(err, QuestionServiceError::InternalError(_)));
        assert_eq!(stored_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_browse_and_get_public_only_show_approved() {
        let (pool, _dir, service, seed) = setup().await;
        let pending = service
            .upload(&seed.contributor, &seed.input(2021), png(b"a"))
            .await
            .unwrap();
        let approved = service
            .upload(&seed.contributor, &seed.input(2022), png(b"b"))
            .await
            .unwrap();
        approve(&pool, approved.id, seed.contributor.id).await;

        let page = service
            .browse(QuestionFilter::default(), &ListParams::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].question.id, approved.id);
        assert_eq!(page.items[0].department_name.as_deref(), Some("Computer Science"));

        // a caller cannot widen the status filter
        let page = service
            .browse(
                QuestionFilter {
                    status: Some(QuestionStatus::Pending),
                    ..Default::default()
                },
                &ListParams::default(),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);

        assert!(service.get_public(approved.id).await.is_ok());
        assert!(matches!(
            service.get_public(pending.id).await,
            Err(QuestionServiceError::NotFound)
        ));
        assert!(matches!(
            service.get_public(12345).await,
            Err(QuestionServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_browse_filters() {
        let (pool, _dir, service, seed) = setup().await;
        for year in [2020, 2021] {
            let q = service
                .upload(&seed.contributor, &seed.input(year), png(b"x"))
                .await
                .unwrap();
            approve(&pool, q.id, seed.contributor.id).await;
        }

        let by_year = service
            .browse(
                QuestionFilter {
                    year: Some(2021),
                    ..Default::default()
                },
                &ListParams::default(),
            )
            .await
            .unwrap();
        assert_eq!(by_year.total, 1);

        let by_search = service
            .browse(
                QuestionFilter {
                    search: Some("cse1".into()),
                    ..Default::default()
                },
                &ListParams::default(),
            )
            .await
            .unwrap();
        assert_eq!(by_search.total, 2);

        let by_other_dept = service
            .browse(
                QuestionFilter {
                    department_id: Some(seed.other_department.id),
                    ..Default::default()
                },
                &ListParams::default(),
            )
            .await
            .unwrap();
        assert_eq!(by_other_dept.total, 0);
    }

    #[tokio::test]
    async fn test_my_submissions_any_status() {
        let (pool, _dir, service, seed) = setup().await;
        let a = service
            .upload(&seed.contributor, &seed.input(2020), png(b"x"))
            .await
            .unwrap();
        service
            .upload(&seed.contributor, &seed.input(2021), png(b"y"))
            .await
            .unwrap();
        approve(&pool, a.id, seed.contributor.id).await;

        let mine = service
            .my_submissions(&seed.contributor, &ListParams::default())
            .await
            .unwrap();
        assert_eq!(mine.total, 2);
        // newest first
        assert_eq!(mine.items[0].question.exam_year, 2021);
    }

    #[test]
    fn test_normalize_tags_limits() {
        let too_long = vec!["x".repeat(MAX_TAG_LEN + 1)];
        assert!(normalize_tags(&too_long).is_err());

        let many: Vec<String> = (0..=MAX_TAGS).map(|i| format!("t{}", i)).collect();
        assert!(normalize_tags(&many).is_err());

        // duplicates do not count towards the limit
        let mut dupes: Vec<String> = (0..MAX_TAGS).map(|i| format!("t{}", i)).collect();
        dupes.push("T0".into());
        assert_eq!(normalize_tags(&dupes).unwrap().len(), MAX_TAGS);
    }

    #[test]
    fn test_parse_tag_list() {
        assert_eq!(
            normalize_tags(&parse_tag_list(" graphs, dp ,,graphs ")).unwrap(),
            vec!["graphs", "dp"]
        );
        assert!(normalize_tags(&parse_tag_list("")).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn prop_normalized_tags_are_trimmed_and_unique(
            raw in proptest::collection::vec("[ a-cA-C]{0,6}", 0..15)
        ) {
            let tags = normalize_tags(&raw).unwrap();
            let mut seen = HashSet::new();
            for tag in &tags {
                prop_assert!(!tag.is_empty());
                prop_assert_eq!(tag.trim(), tag.as_str());
                prop_assert!(seen.insert(tag.to_lowercase()));
            }
        }

        #[test]
        fn prop_exam_year_window(year in 1900i32..2200, current in 2000i32..2100) {
            let result = validate_exam_year(year, current);
            prop_assert_eq!(result.is_ok(), (2000..=current + 1).contains(&year));
        }
    }
}
