//! Question repository
//!
//! Database operations for uploaded exam papers. Listing queries are built
//! from a [`QuestionFilter`] with sqlx's `QueryBuilder`, generic over the
//! backend. Reviews and deletions write their moderation log entry in the
//! same transaction as the change itself.

use super::moderation_log::{insert_entry_mysql, insert_entry_sqlite};
use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{
    ListParams, ModerationAction, ModerationLogEntry, NewQuestion, PagedResult, Question,
    QuestionFilter, QuestionStatus, QuestionWithMeta,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    database::HasArguments, mysql::MySqlRow, sqlite::SqliteRow, Database, Encode, MySql,
    MySqlPool, QueryBuilder, Row, Sqlite, SqlitePool, Type,
};
use std::sync::Arc;

/// Sort order for question listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuestionOrder {
    #[default]
    NewestFirst,
    /// Used by the moderation queue so the longest-waiting upload comes first
    OldestFirst,
}

/// Review decision applied by [`QuestionRepository::review`]
#[derive(Debug, Clone)]
pub struct ReviewUpdate {
    pub status: QuestionStatus,
    pub reviewer_id: i64,
    pub rejection_reason: Option<String>,
    pub reviewed_at: DateTime<Utc>,
}

#[async_trait]
pub trait QuestionRepository: Send + Sync {
    /// Insert a new question in `pending` state
    async fn create(&self, question: &NewQuestion) -> Result<Question>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Question>>;

    async fn get_with_meta(&self, id: i64) -> Result<Option<QuestionWithMeta>>;

    async fn list(
        &self,
        filter: &QuestionFilter,
        order: QuestionOrder,
        params: &ListParams,
    ) -> Result<PagedResult<QuestionWithMeta>>;

    /// Fetch the given ids that also match the filter, in id order
    async fn list_by_ids(&self, ids: &[i64], filter: &QuestionFilter) -> Result<Vec<Question>>;

    /// Apply a review decision if the question is still in `expected` state,
    /// logging it in the same transaction.
    ///
    /// Returns false, and writes nothing, when the question is missing or was
    /// already reviewed.
    async fn review(&self, id: i64, expected: QuestionStatus, update: &ReviewUpdate) -> Result<bool>;

    /// Delete a question and append `entry` in one transaction.
    ///
    /// The entry is written after the row is gone, so it is stored without a
    /// question id. Returns false, and writes nothing, when the question is
    /// missing.
    async fn delete(&self, id: i64, entry: &ModerationLogEntry) -> Result<bool>;

    async fn count(&self, filter: &QuestionFilter) -> Result<i64>;

    /// Number of questions per status; statuses without rows are omitted
    async fn count_by_status(&self) -> Result<Vec<(QuestionStatus, i64)>>;
}

pub struct SqlxQuestionRepository {
    pool: DynDatabasePool,
}

impl SqlxQuestionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn QuestionRepository> {
        Arc::new(Self::new(pool))
    }
}

const QUESTION_COLUMNS: &str = r#"
    q.id, q.image_url, q.storage_key, q.thumbnail_url, q.exam_year, q.session,
    q.department_id, q.exam_name_id, q.course_id, q.course_code, q.description, q.tags,
    q.status, q.rejection_reason, q.created_by, q.reviewed_by,
    q.created_at, q.updated_at, q.reviewed_at
"#;

const META_COLUMNS: &str = r#"
    d.name AS department_name, e.name AS exam_name, c.title AS course_title,
    u.email AS uploader_email
"#;

const META_JOINS: &str = r#"
    LEFT JOIN departments d ON d.id = q.department_id
    LEFT JOIN exam_names e ON e.id = q.exam_name_id
    LEFT JOIN courses c ON c.id = q.course_id
    LEFT JOIN users u ON u.id = q.created_by
"#;

const INSERT_QUESTION: &str = r#"
    INSERT INTO questions (
        image_url, storage_key, exam_year, session, department_id, exam_name_id, course_id,
        course_code, description, search_text, tags, status, created_by, created_at, updated_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const REVIEW_QUESTION: &str = r#"
    UPDATE questions
    SET status = ?, rejection_reason = ?, reviewed_by = ?, reviewed_at = ?, updated_at = ?
    WHERE id = ? AND status = ?
"#;

/// Lowercased description and course code, matched by the search filter.
///
/// Folding happens here rather than with SQL `LOWER()`, which only folds
/// ASCII on SQLite.
pub fn search_text(description: Option<&str>, course_code: Option<&str>) -> String {
    [description, course_code]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase()
}

/// Escape LIKE wildcards using `!` as the escape character
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '!' | '%' | '_') {
            escaped.push('!');
        }
        escaped.push(c);
    }
    escaped
}

/// LIKE pattern for the search term, folded the same way as `search_text`
fn search_pattern(filter: &QuestionFilter) -> Option<String> {
    filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| format!("%{}%", escape_like(&t.to_lowercase())))
}

/// Append the filter's conditions, starting with `WHERE`
fn push_filter<'a, DB>(builder: &mut QueryBuilder<'a, DB>, filter: &QuestionFilter)
where
    DB: Database,
    i64: Encode<'a, DB> + Type<DB>,
    String: Encode<'a, DB> + Type<DB>,
{
    builder.push(" WHERE 1 = 1");
    if let Some(status) = filter.status {
        builder.push(" AND q.status = ").push_bind(status.to_string());
    }
    if let Some(id) = filter.department_id {
        builder.push(" AND q.department_id = ").push_bind(id);
    }
    if let Some(id) = filter.course_id {
        builder.push(" AND q.course_id = ").push_bind(id);
    }
    if let Some(id) = filter.exam_name_id {
        builder.push(" AND q.exam_name_id = ").push_bind(id);
    }
    if let Some(year) = filter.year {
        builder.push(" AND q.exam_year = ").push_bind(i64::from(year));
    }
    if let Some(session) = filter.session {
        builder.push(" AND q.session = ").push_bind(session.to_string());
    }
    if let Some(user_id) = filter.created_by {
        builder.push(" AND q.created_by = ").push_bind(user_id);
    }
    if let Some(pattern) = search_pattern(filter) {
        builder
            .push(" AND q.search_text LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '!'");
    }
}

fn select_with_meta<'a, DB>(filter: &QuestionFilter) -> QueryBuilder<'a, DB>
where
    DB: Database,
    <DB as HasArguments<'a>>::Arguments: Default,
    i64: Encode<'a, DB> + Type<DB>,
    String: Encode<'a, DB> + Type<DB>,
{
    let mut builder = QueryBuilder::new(format!(
        "SELECT {}, {} FROM questions q {}",
        QUESTION_COLUMNS, META_COLUMNS, META_JOINS
    ));
    push_filter(&mut builder, filter);
    builder
}

fn list_query<'a, DB>(
    filter: &QuestionFilter,
    order: QuestionOrder,
    params: &ListParams,
) -> QueryBuilder<'a, DB>
where
    DB: Database,
    <DB as HasArguments<'a>>::Arguments: Default,
    i64: Encode<'a, DB> + Type<DB>,
    String: Encode<'a, DB> + Type<DB>,
{
    let mut builder = select_with_meta(filter);
    builder
        .push(" ")
        .push(order_sql(order))
        .push(" LIMIT ")
        .push_bind(params.limit())
        .push(" OFFSET ")
        .push_bind(params.offset());
    builder
}

fn by_ids_query<'a, DB>(ids: &[i64], filter: &QuestionFilter) -> QueryBuilder<'a, DB>
where
    DB: Database,
    <DB as HasArguments<'a>>::Arguments: Default,
    i64: Encode<'a, DB> + Type<DB>,
    String: Encode<'a, DB> + Type<DB>,
{
    let mut builder = select_with_meta(filter);
    builder.push(" AND q.id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(") ORDER BY q.id");
    builder
}

fn count_query<'a, DB>(filter: &QuestionFilter) -> QueryBuilder<'a, DB>
where
    DB: Database,
    <DB as HasArguments<'a>>::Arguments: Default,
    i64: Encode<'a, DB> + Type<DB>,
    String: Encode<'a, DB> + Type<DB>,
{
    let mut builder = QueryBuilder::new("SELECT COUNT(*) AS total FROM questions q");
    push_filter(&mut builder, filter);
    builder
}

/// Log entry for a review that just took effect
fn review_entry(id: i64, update: &ReviewUpdate) -> Result<ModerationLogEntry> {
    let action = ModerationAction::for_review(update.status)
        .ok_or_else(|| anyhow!("A review cannot move a question to {}", update.status))?;
    Ok(ModerationLogEntry {
        id: 0,
        question_id: Some(id),
        moderator_id: update.reviewer_id,
        action,
        reason: update.rejection_reason.clone(),
        created_at: update.reviewed_at,
    })
}

fn order_sql(order: QuestionOrder) -> &'static str {
    match order {
        QuestionOrder::NewestFirst => "ORDER BY q.created_at DESC, q.id DESC",
        QuestionOrder::OldestFirst => "ORDER BY q.created_at ASC, q.id ASC",
    }
}

fn decode_tags(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

#[async_trait]
impl QuestionRepository for SqlxQuestionRepository {
    async fn create(&self, question: &NewQuestion) -> Result<Question> {
        let now = Utc::now();
        let tags = serde_json::to_string(&question.tags).context("Failed to encode tags")?;
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                create_question_sqlite(self.pool.sqlite()?, question, &tags, now).await?
            }
            DatabaseDriver::Mysql => {
                create_question_mysql(self.pool.mysql()?, question, &tags, now).await?
            }
        };

        Ok(Question {
            id,
            image_url: question.image_url.clone(),
            storage_key: question.storage_key.clone(),
            thumbnail_url: None,
            exam_year: question.exam_year,
            session: question.session,
            department_id: question.department_id,
            exam_name_id: question.exam_name_id,
            course_id: question.course_id,
            course_code: question.course_code.clone(),
            description: question.description.clone(),
            tags: question.tags.clone(),
            status: QuestionStatus::Pending,
            rejection_reason: None,
            created_by: question.created_by,
            reviewed_by: None,
            created_at: now,
            updated_at: now,
            reviewed_at: None,
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Question>> {
        Ok(self.get_with_meta(id).await?.map(|m| m.question))
    }

    async fn get_with_meta(&self, id: i64) -> Result<Option<QuestionWithMeta>> {
        let sql = format!(
            "SELECT {}, {} FROM questions q {} WHERE q.id = ?",
            QUESTION_COLUMNS, META_COLUMNS, META_JOINS
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get question")?
                .as_ref()
                .map(row_to_meta_sqlite)
                .transpose(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get question")?
                .as_ref()
                .map(row_to_meta_mysql)
                .transpose(),
        }
    }

    async fn list(
        &self,
        filter: &QuestionFilter,
        order: QuestionOrder,
        params: &ListParams,
    ) -> Result<PagedResult<QuestionWithMeta>> {
        let items = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut query = list_query::<Sqlite>(filter, order, params);
                let rows = query
                    .build()
                    .fetch_all(self.pool.sqlite()?)
                    .await
                    .context("Failed to list questions")?;
                rows.iter().map(row_to_meta_sqlite).collect::<Result<Vec<_>>>()?
            }
            DatabaseDriver::Mysql => {
                let mut query = list_query::<MySql>(filter, order, params);
                let rows = query
                    .build()
                    .fetch_all(self.pool.mysql()?)
                    .await
                    .context("Failed to list questions")?;
                rows.iter().map(row_to_meta_mysql).collect::<Result<Vec<_>>>()?
            }
        };

        let total = self.count(filter).await?;
        Ok(PagedResult::new(items, total, params))
    }

    async fn list_by_ids(&self, ids: &[i64], filter: &QuestionFilter) -> Result<Vec<Question>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = match self.pool.driver() {
            DatabaseDriver::Sqlite => by_ids_query::<Sqlite>(ids, filter)
                .build()
                .fetch_all(self.pool.sqlite()?)
                .await
                .context("Failed to load questions by id")?
                .iter()
                .map(row_to_meta_sqlite)
                .collect::<Result<Vec<_>>>()?,
            DatabaseDriver::Mysql => by_ids_query::<MySql>(ids, filter)
                .build()
                .fetch_all(self.pool.mysql()?)
                .await
                .context("Failed to load questions by id")?
                .iter()
                .map(row_to_meta_mysql)
                .collect::<Result<Vec<_>>>()?,
        };
        Ok(rows.into_iter().map(|m| m.question).collect())
    }

    async fn review(&self, id: i64, expected: QuestionStatus, update: &ReviewUpdate) -> Result<bool> {
        let entry = review_entry(id, update)?;
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                review_question_sqlite(self.pool.sqlite()?, id, expected, update, &entry).await
            }
            DatabaseDriver::Mysql => {
                review_question_mysql(self.pool.mysql()?, id, expected, update, &entry).await
            }
        }
    }

    async fn delete(&self, id: i64, entry: &ModerationLogEntry) -> Result<bool> {
        let entry = ModerationLogEntry {
            question_id: None,
            ..entry.clone()
        };
        match self.pool.driver() {
            DatabaseDriver::Sqlite => delete_question_sqlite(self.pool.sqlite()?, id, &entry).await,
            DatabaseDriver::Mysql => delete_question_mysql(self.pool.mysql()?, id, &entry).await,
        }
    }

    async fn count(&self, filter: &QuestionFilter) -> Result<i64> {
        let total: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => count_query::<Sqlite>(filter)
                .build()
                .fetch_one(self.pool.sqlite()?)
                .await
                .context("Failed to count questions")?
                .get("total"),
            DatabaseDriver::Mysql => count_query::<MySql>(filter)
                .build()
                .fetch_one(self.pool.mysql()?)
                .await
                .context("Failed to count questions")?
                .get("total"),
        };
        Ok(total)
    }

    async fn count_by_status(&self) -> Result<Vec<(QuestionStatus, i64)>> {
        let sql = "SELECT status, COUNT(*) AS total FROM questions GROUP BY status ORDER BY status";
        let raw: Vec<(String, i64)> = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_as(sql).fetch_all(self.pool.sqlite()?).await,
            DatabaseDriver::Mysql => sqlx::query_as(sql).fetch_all(self.pool.mysql()?).await,
        }
        .context("Failed to count questions by status")?;

        Ok(raw
            .into_iter()
            .filter_map(|(status, total)| status.parse().ok().map(|s| (s, total)))
            .collect())
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn review_question_sqlite(
    pool: &SqlitePool,
    id: i64,
    expected: QuestionStatus,
    update: &ReviewUpdate,
    entry: &ModerationLogEntry,
) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to start transaction")?;
    let affected = sqlx::query(REVIEW_QUESTION)
        .bind(update.status.to_string())
        .bind(&update.rejection_reason)
        .bind(update.reviewer_id)
        .bind(update.reviewed_at)
        .bind(update.reviewed_at)
        .bind(id)
        .bind(expected.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to review question")?
        .rows_affected();
    if affected == 0 {
        return Ok(false);
    }
    insert_entry_sqlite(&mut *tx, entry).await?;
    tx.commit().await.context("Failed to commit review")?;
    Ok(true)
}

async fn delete_question_sqlite(
    pool: &SqlitePool,
    id: i64,
    entry: &ModerationLogEntry,
) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to start transaction")?;
    let affected = sqlx::query("DELETE FROM questions WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete question")?
        .rows_affected();
    if affected == 0 {
        return Ok(false);
    }
    insert_entry_sqlite(&mut *tx, entry).await?;
    tx.commit().await.context("Failed to commit deletion")?;
    Ok(true)
}

async fn create_question_sqlite(
    pool: &SqlitePool,
    question: &NewQuestion,
    tags: &str,
    now: DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(INSERT_QUESTION)
        .bind(&question.image_url)
        .bind(&question.storage_key)
        .bind(question.exam_year)
        .bind(question.session.map(|s| s.to_string()))
        .bind(question.department_id)
        .bind(question.exam_name_id)
        .bind(question.course_id)
        .bind(&question.course_code)
        .bind(&question.description)
        .bind(search_text(
            question.description.as_deref(),
            question.course_code.as_deref(),
        ))
        .bind(tags)
        .bind(QuestionStatus::Pending.to_string())
        .bind(question.created_by)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create question")?;
    Ok(result.last_insert_rowid())
}

fn row_to_question_sqlite(row: &SqliteRow) -> Result<Question> {
    let status: String = row.get("status");
    let session: Option<String> = row.get("session");
    Ok(Question {
        id: row.get("id"),
        image_url: row.get("image_url"),
        storage_key: row.get("storage_key"),
        thumbnail_url: row.get("thumbnail_url"),
        exam_year: row.get("exam_year"),
        session: session.and_then(|s| s.parse().ok()),
        department_id: row.get("department_id"),
        exam_name_id: row.get("exam_name_id"),
        course_id: row.get("course_id"),
        course_code: row.get("course_code"),
        description: row.get("description"),
        tags: decode_tags(row.get("tags")),
        status: status.parse().unwrap_or_default(),
        rejection_reason: row.get("rejection_reason"),
        created_by: row.get("created_by"),
        reviewed_by: row.get("reviewed_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        reviewed_at: row.get("reviewed_at"),
    })
}

fn row_to_meta_sqlite(row: &SqliteRow) -> Result<QuestionWithMeta> {
    Ok(QuestionWithMeta {
        question: row_to_question_sqlite(row)?,
        department_name: row.get("department_name"),
        exam_name: row.get("exam_name"),
        course_title: row.get("course_title"),
        uploader_email: row.get("uploader_email"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn review_question_mysql(
    pool: &MySqlPool,
    id: i64,
    expected: QuestionStatus,
    update: &ReviewUpdate,
    entry: &ModerationLogEntry,
) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to start transaction")?;
    let affected = sqlx::query(REVIEW_QUESTION)
        .bind(update.status.to_string())
        .bind(&update.rejection_reason)
        .bind(update.reviewer_id)
        .bind(update.reviewed_at)
        .bind(update.reviewed_at)
        .bind(id)
        .bind(expected.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to review question")?
        .rows_affected();
    if affected == 0 {
        return Ok(false);
    }
    insert_entry_mysql(&mut *tx, entry).await?;
    tx.commit().await.context("Failed to commit review")?;
    Ok(true)
}

async fn delete_question_mysql(
    pool: &MySqlPool,
    id: i64,
    entry: &ModerationLogEntry,
) -> Result<bool> {
    let mut tx = pool.begin().await.context("Failed to start transaction")?;
    let affected = sqlx::query("DELETE FROM questions WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete question")?
        .rows_affected();
    if affected == 0 {
        return Ok(false);
    }
    insert_entry_mysql(&mut *tx, entry).await?;
    tx.commit().await.context("Failed to commit deletion")?;
    Ok(true)
}

async fn create_question_mysql(
    pool: &MySqlPool,
    question: &NewQuestion,
    tags: &str,
    now: DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(INSERT_QUESTION)
        .bind(&question.image_url)
        .bind(&question.storage_key)
        .bind(question.exam_year)
        .bind(question.session.map(|s| s.to_string()))
        .bind(question.department_id)
        .bind(question.exam_name_id)
        .bind(question.course_id)
        .bind(&question.course_code)
        .bind(&question.description)
        .bind(search_text(
            question.description.as_deref(),
            question.course_code.as_deref(),
        ))
        .bind(tags)
        .bind(QuestionStatus::Pending.to_string())
        .bind(question.created_by)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create question")?;
    Ok(result.last_insert_id() as i64)
}

fn row_to_question_mysql(row: &MySqlRow) -> Result<Question> {
    let status: String = row.get("status");
    let session: Option<String> = row.get("session");
    Ok(Question {
        id: row.get("id"),
        image_url: row.get("image_url"),
        storage_key: row.get("storage_key"),
        thumbnail_url: row.get("thumbnail_url"),
        exam_year: row.get("exam_year"),
        session: session.and_then(|s| s.parse().ok()),
        department_id: row.get("department_id"),
        exam_name_id: row.get("exam_name_id"),
        course_id: row.get("course_id"),
        course_code: row.get("course_code"),
        description: row.get("description"),
        tags: decode_tags(row.get("tags")),
        status: status.parse().unwrap_or_default(),
        rejection_reason: row.get("rejection_reason"),
        created_by: row.get("created_by"),
        reviewed_by: row.get("reviewed_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        reviewed_at: row.get("reviewed_at"),
    })
}

fn row_to_meta_mysql(row: &MySqlRow) -> Result<QuestionWithMeta> {
    Ok(QuestionWithMeta {
        question: row_to_question_mysql(row)?,
        department_name: row.get("department_name"),
        exam_name: row.get("exam_name"),
        course_title: row.get("course_title"),
        uploader_email: row.get("uploader_email"),
    })
}
