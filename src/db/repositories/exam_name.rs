//! Exam name repository

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::ExamName;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{mysql::MySqlRow, sqlite::SqliteRow, Row};
use std::sync::Arc;

#[async_trait]
pub trait ExamNameRepository: Send + Sync {
    async fn create(&self, exam_name: &ExamName) -> Result<ExamName>;

    async fn get_by_id(&self, id: i64) -> Result<Option<ExamName>>;

    async fn get_by_name(&self, name: &str) -> Result<Option<ExamName>>;

    async fn list(&self, active_only: bool) -> Result<Vec<ExamName>>;

    async fn update(&self, exam_name: &ExamName) -> Result<ExamName>;

    async fn delete(&self, id: i64) -> Result<bool>;

    async fn is_referenced(&self, id: i64) -> Result<bool>;
}

pub struct SqlxExamNameRepository {
    pool: DynDatabasePool,
}

impl SqlxExamNameRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ExamNameRepository> {
        Arc::new(Self::new(pool))
    }
}

const SELECT_EXAM_NAMES: &str =
    "SELECT id, name, active, created_at, updated_at FROM exam_names";

#[async_trait]
impl ExamNameRepository for SqlxExamNameRepository {
    async fn create(&self, exam_name: &ExamName) -> Result<ExamName> {
        let sql =
            "INSERT INTO exam_names (name, active, created_at, updated_at) VALUES (?, ?, ?, ?)";
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(&exam_name.name)
                .bind(exam_name.active)
                .bind(exam_name.created_at)
                .bind(exam_name.updated_at)
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to create exam name")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(&exam_name.name)
                .bind(exam_name.active)
                .bind(exam_name.created_at)
                .bind(exam_name.updated_at)
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to create exam name")?
                .last_insert_id() as i64,
        };
        Ok(ExamName {
            id,
            ..exam_name.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<ExamName>> {
        let sql = format!("{} WHERE id = ?", SELECT_EXAM_NAMES);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => Ok(sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get exam name")?
                .as_ref()
                .map(row_to_exam_name_sqlite)),
            DatabaseDriver::Mysql => Ok(sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get exam name")?
                .as_ref()
                .map(row_to_exam_name_mysql)),
        }
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<ExamName>> {
        let sql = format!("{} WHERE LOWER(name) = LOWER(?)", SELECT_EXAM_NAMES);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => Ok(sqlx::query(&sql)
                .bind(name)
                .fetch_optional(self.pool.sqlite()?)
                .await
                .context("Failed to get exam name")?
                .as_ref()
                .map(row_to_exam_name_sqlite)),
            DatabaseDriver::Mysql => Ok(sqlx::query(&sql)
                .bind(name)
                .fetch_optional(self.pool.mysql()?)
                .await
                .context("Failed to get exam name")?
                .as_ref()
                .map(row_to_exam_name_mysql)),
        }
    }

    async fn list(&self, active_only: bool) -> Result<Vec<ExamName>> {
        let sql = if active_only {
            format!("{} WHERE active = TRUE ORDER BY name", SELECT_EXAM_NAMES)
        } else {
            format!("{} ORDER BY name", SELECT_EXAM_NAMES)
        };
        match self.pool.driver() {
            DatabaseDriver::Sqlite => Ok(sqlx::query(&sql)
                .fetch_all(self.pool.sqlite()?)
                .await
                .context("Failed to list exam names")?
                .iter()
                .map(row_to_exam_name_sqlite)
                .collect()),
            DatabaseDriver::Mysql => Ok(sqlx::query(&sql)
                .fetch_all(self.pool.mysql()?)
                .await
                .context("Failed to list exam names")?
                .iter()
                .map(row_to_exam_name_mysql)
                .collect()),
        }
    }

    async fn update(&self, exam_name: &ExamName) -> Result<ExamName> {
        let sql = "UPDATE exam_names SET name = ?, active = ?, updated_at = ? WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(&exam_name.name)
                .bind(exam_name.active)
                .bind(exam_name.updated_at)
                .bind(exam_name.id)
                .execute(self.pool.sqlite()?)
                .await
                .map(|_| ()),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(&exam_name.name)
                .bind(exam_name.active)
                .bind(exam_name.updated_at)
                .bind(exam_name.id)
                .execute(self.pool.mysql()?)
                .await
                .map(|_| ()),
        }
        .context("Failed to update exam name")?;
        Ok(exam_name.clone())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let sql = "DELETE FROM exam_names WHERE id = ?";
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(id)
                .execute(self.pool.sqlite()?)
                .await
                .map(|r| r.rows_affected()),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(id)
                .execute(self.pool.mysql()?)
                .await
                .map(|r| r.rows_affected()),
        }
        .context("Failed to delete exam name")?;
        Ok(affected > 0)
    }

    async fn is_referenced(&self, id: i64) -> Result<bool> {
        let sql = "SELECT COUNT(*) FROM questions WHERE exam_name_id = ?";
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(sql)
                .bind(id)
                .fetch_one(self.pool.sqlite()?)
                .await,
            DatabaseDriver::Mysql => sqlx::query_scalar(sql)
                .bind(id)
                .fetch_one(self.pool.mysql()?)
                .await,
        }
        .context("Failed to check exam name references")?;
        Ok(count > 0)
    }
}

fn row_to_exam_name_sqlite(row: &SqliteRow) -> ExamName {
    ExamName {
        id: row.get("id"),
        name: row.get("name"),
        active: row.get("active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_exam_name_mysql(row: &MySqlRow) -> ExamName {
    ExamName {
        id: row.get("id"),
        name: row.get("name"),
        active: row.get("active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
