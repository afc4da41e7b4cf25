//! Course repository

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::Course;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{mysql::MySqlRow, sqlite::SqliteRow, MySqlPool, Row, SqlitePool};
use std::sync::Arc;

#[async_trait]
pub trait CourseRepository: Send + Sync {
    async fn create(&self, course: &Course) -> Result<Course>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Course>>;

    async fn get_by_code(&self, code: &str) -> Result<Option<Course>>;

    /// All courses ordered by code
    async fn list(&self, active_only: bool) -> Result<Vec<Course>>;

    /// Courses of one department ordered by code
    async fn list_by_department(&self, department_id: i64, active_only: bool) -> Result<Vec<Course>>;

    async fn update(&self, course: &Course) -> Result<Course>;

    async fn delete(&self, id: i64) -> Result<bool>;

    async fn is_referenced(&self, id: i64) -> Result<bool>;
}

pub struct SqlxCourseRepository {
    pool: DynDatabasePool,
}

impl SqlxCourseRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CourseRepository> {
        Arc::new(Self::new(pool))
    }
}

/// Parameter bound into a course lookup
#[derive(Clone, Copy)]
enum Param<'a> {
    Id(i64),
    Text(&'a str),
}

#[async_trait]
impl CourseRepository for SqlxCourseRepository {
    async fn create(&self, course: &Course) -> Result<Course> {
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => create_course_sqlite(self.pool.sqlite()?, course).await?,
            DatabaseDriver::Mysql => create_course_mysql(self.pool.mysql()?, course).await?,
        };
        Ok(Course {
            id,
            ..course.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Course>> {
        Ok(self
            .select("WHERE id = ?", &[Param::Id(id)])
            .await?
            .into_iter()
            .next())
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<Course>> {
        Ok(self
            .select("WHERE code = ?", &[Param::Text(code)])
            .await?
            .into_iter()
            .next())
    }

    async fn list(&self, active_only: bool) -> Result<Vec<Course>> {
        let clause = if active_only {
            "WHERE active = TRUE ORDER BY code"
        } else {
            "ORDER BY code"
        };
        self.select(clause, &[]).await
    }

    async fn list_by_department(&self, department_id: i64, active_only: bool) -> Result<Vec<Course>> {
        let clause = if active_only {
            "WHERE department_id = ? AND active = TRUE ORDER BY code"
        } else {
            "WHERE department_id = ? ORDER BY code"
        };
        self.select(clause, &[Param::Id(department_id)]).await
    }

    async fn update(&self, course: &Course) -> Result<Course> {
        let sql = r#"
            UPDATE courses
            SET code = ?, title = ?, department_id = ?, active = ?, updated_at = ?
            WHERE id = ?
        "#;
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(&course.code)
                .bind(&course.title)
                .bind(course.department_id)
                .bind(course.active)
                .bind(course.updated_at)
                .bind(course.id)
                .execute(self.pool.sqlite()?)
                .await
                .map(|_| ()),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(&course.code)
                .bind(&course.title)
                .bind(course.department_id)
                .bind(course.active)
                .bind(course.updated_at)
                .bind(course.id)
                .execute(self.pool.mysql()?)
                .await
                .map(|_| ()),
        }
        .context("Failed to update course")?;
        Ok(course.clone())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let sql = "DELETE FROM courses WHERE id = ?";
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
        .context("Failed to delete course")?;
        Ok(affected > 0)
    }

    async fn is_referenced(&self, id: i64) -> Result<bool> {
        let sql = "SELECT COUNT(*) FROM questions WHERE course_id = ?";
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
        .context("Failed to check course references")?;
        Ok(count > 0)
    }
}

impl SqlxCourseRepository {
    async fn select(&self, clause: &str, params: &[Param<'_>]) -> Result<Vec<Course>> {
        let sql = format!(
            "SELECT id, code, title, department_id, active, created_at, updated_at FROM courses {}",
            clause
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => select_courses_sqlite(self.pool.sqlite()?, &sql, params).await,
            DatabaseDriver::Mysql => select_courses_mysql(self.pool.mysql()?, &sql, params).await,
        }
    }
}

const INSERT_COURSE: &str = r#"
    INSERT INTO courses (code, title, department_id, active, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?)
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_course_sqlite(pool: &SqlitePool, course: &Course) -> Result<i64> {
    let result = sqlx::query(INSERT_COURSE)
        .bind(&course.code)
        .bind(&course.title)
        .bind(course.department_id)
        .bind(course.active)
        .bind(course.created_at)
        .bind(course.updated_at)
        .execute(pool)
        .await
        .context("Failed to create course")?;
    Ok(result.last_insert_rowid())
}

async fn select_courses_sqlite(pool: &SqlitePool, sql: &str, params: &[Param<'_>]) -> Result<Vec<Course>> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = match *param {
            Param::Id(id) => query.bind(id),
            Param::Text(text) => query.bind(text),
        };
    }
    let rows = query.fetch_all(pool).await.context("Failed to load courses")?;
    Ok(rows.iter().map(row_to_course_sqlite).collect())
}

fn row_to_course_sqlite(row: &SqliteRow) -> Course {
    Course {
        id: row.get("id"),
        code: row.get("code"),
        title: row.get("title"),
        department_id: row.get("department_id"),
        active: row.get("active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_course_mysql(pool: &MySqlPool, course: &Course) -> Result<i64> {
    let result = sqlx::query(INSERT_COURSE)
        .bind(&course.code)
        .bind(&course.title)
        .bind(course.department_id)
        .bind(course.active)
        .bind(course.created_at)
        .bind(course.updated_at)
        .execute(pool)
        .await
        .context("Failed to create course")?;
    Ok(result.last_insert_id() as i64)
}

async fn select_courses_mysql(pool: &MySqlPool, sql: &str, params: &[Param<'_>]) -> Result<Vec<Course>> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = match *param {
            Param::Id(id) => query.bind(id),
            Param::Text(text) => query.bind(text),
        };
    }
    let rows = query.fetch_all(pool).await.context("Failed to load courses")?;
    Ok(rows.iter().map(row_to_course_mysql).collect())
}

fn row_to_course_mysql(row: &MySqlRow) -> Course {
    Course {
        id: row.get("id"),
        code: row.get("code"),
        title: row.get("title"),
        department_id: row.get("department_id"),
        active: row.get("active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use chrono::Utc;

    async fn setup_test_repo() -> (SqlxCourseRepository, i64, i64) {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let db = pool.sqlite().unwrap();
        let cse = sqlx::query("INSERT INTO departments (code, name) VALUES ('CSE', 'Computing')")
            .execute(db)
            .await
            .unwrap()
            .last_insert_rowid();
        let eee = sqlx::query("INSERT INTO departments (code, name) VALUES ('EEE', 'Electrical')")
            .execute(db)
            .await
            .unwrap()
            .last_insert_rowid();
        (SqlxCourseRepository::new(pool), cse, eee)
    }

    fn course(code: &str, department_id: i64, active: bool) -> Course {
        let now = Utc::now();
        Course {
            id: 0,
            code: code.into(),
            title: format!("{} title", code),
            department_id,
            active,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_list_by_department_ordered_by_code() {
        let (repo, cse, eee) = setup_test_repo().await;
        repo.create(&course("CSE201", cse, true)).await.unwrap();
        repo.create(&course("CSE101", cse, true)).await.unwrap();
        repo.create(&course("CSE301", cse, false)).await.unwrap();
        repo.create(&course("EEE101", eee, true)).await.unwrap();

        let codes: Vec<String> = repo
            .list_by_department(cse, true)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.code)
            .collect();
        assert_eq!(codes, vec!["CSE101", "CSE201"]);
        assert_eq!(repo.list_by_department(cse, false).await.unwrap().len(), 3);
        assert_eq!(repo.list(true).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_department_rejected() {
        let (repo, _, _) = setup_test_repo().await;
        assert!(repo.create(&course("XXX100", 404, true)).await.is_err());
    }

    #[tokio::test]
    async fn test_update_moves_department() {
        let (repo, cse, eee) = setup_test_repo().await;
        let mut created = repo.create(&course("MIX100", cse, true)).await.unwrap();
        created.department_id = eee;
        repo.update(&created).await.unwrap();

        let loaded = repo.get_by_code("MIX100").await.unwrap().unwrap();
        assert_eq!(loaded.department_id, eee);
        assert!(repo.delete(loaded.id).await.unwrap());
    }
}
