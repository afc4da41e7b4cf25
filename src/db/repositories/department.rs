//! Department repository

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::Department;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{mysql::MySqlRow, sqlite::SqliteRow, Row};
use std::sync::Arc;

#[async_trait]
pub trait DepartmentRepository: Send + Sync {
    async fn create(&self, department: &Department) -> Result<Department>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Department>>;

    async fn get_by_code(&self, code: &str) -> Result<Option<Department>>;

    /// List departments ordered by name
    async fn list(&self, active_only: bool) -> Result<Vec<Department>>;

    async fn update(&self, department: &Department) -> Result<Department>;

    async fn delete(&self, id: i64) -> Result<bool>;

    /// Whether any course or question still points at the department
    async fn is_referenced(&self, id: i64) -> Result<bool>;

    async fn count(&self) -> Result<i64>;
}

pub struct SqlxDepartmentRepository {
    pool: DynDatabasePool,
}

impl SqlxDepartmentRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn DepartmentRepository> {
        Arc::new(Self::new(pool))
    }

    async fn fetch_where(&self, clause: &str, arg: Option<&str>, id: Option<i64>) -> Result<Vec<Department>> {
        let sql = format!(
            "SELECT id, code, name, description, active, created_at, updated_at FROM departments {}",
            clause
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let mut query = sqlx::query(&sql);
                if let Some(arg) = arg {
                    query = query.bind(arg);
                }
                if let Some(id) = id {
                    query = query.bind(id);
                }
                let rows = query
                    .fetch_all(self.pool.sqlite()?)
                    .await
                    .context("Failed to load departments")?;
                Ok(rows.iter().map(row_to_department_sqlite).collect())
            }
            DatabaseDriver::Mysql => {
                let mut query = sqlx::query(&sql);
                if let Some(arg) = arg {
                    query = query.bind(arg);
                }
                if let Some(id) = id {
                    query = query.bind(id);
                }
                let rows = query
                    .fetch_all(self.pool.mysql()?)
                    .await
                    .context("Failed to load departments")?;
                Ok(rows.iter().map(row_to_department_mysql).collect())
            }
        }
    }
}

#[async_trait]
impl DepartmentRepository for SqlxDepartmentRepository {
    async fn create(&self, department: &Department) -> Result<Department> {
        let sql = r#"
            INSERT INTO departments (code, name, description, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
        "#;
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(&department.code)
                .bind(&department.name)
                .bind(&department.description)
                .bind(department.active)
                .bind(department.created_at)
                .bind(department.updated_at)
                .execute(self.pool.sqlite()?)
                .await
                .context("Failed to create department")?
                .last_insert_rowid(),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(&department.code)
                .bind(&department.name)
                .bind(&department.description)
                .bind(department.active)
                .bind(department.created_at)
                .bind(department.updated_at)
                .execute(self.pool.mysql()?)
                .await
                .context("Failed to create department")?
                .last_insert_id() as i64,
        };
        Ok(Department {
            id,
            ..department.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Department>> {
        Ok(self
            .fetch_where("WHERE id = ?", None, Some(id))
            .await?
            .into_iter()
            .next())
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<Department>> {
        Ok(self
            .fetch_where("WHERE code = ?", Some(code), None)
            .await?
            .into_iter()
            .next())
    }

    async fn list(&self, active_only: bool) -> Result<Vec<Department>> {
        let clause = if active_only {
            "WHERE active = TRUE ORDER BY name"
        } else {
            "ORDER BY name"
        };
        self.fetch_where(clause, None, None).await
    }

    async fn update(&self, department: &Department) -> Result<Department> {
        let sql = r#"
            UPDATE departments
            SET code = ?, name = ?, description = ?, active = ?, updated_at = ?
            WHERE id = ?
        "#;
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(&department.code)
                .bind(&department.name)
                .bind(&department.description)
                .bind(department.active)
                .bind(department.updated_at)
                .bind(department.id)
                .execute(self.pool.sqlite()?)
                .await
                .map(|_| ()),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(&department.code)
                .bind(&department.name)
                .bind(&department.description)
                .bind(department.active)
                .bind(department.updated_at)
                .bind(department.id)
                .execute(self.pool.mysql()?)
                .await
                .map(|_| ()),
        }
        .context("Failed to update department")?;
        Ok(department.clone())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let sql = "DELETE FROM departments WHERE id = ?";
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
        .context("Failed to delete department")?;
        Ok(affected > 0)
    }

    async fn is_referenced(&self, id: i64) -> Result<bool> {
        let sql = r#"
            SELECT (SELECT COUNT(*) FROM courses WHERE department_id = ?)
                 + (SELECT COUNT(*) FROM questions WHERE department_id = ?)
        "#;
        let count: i64 = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(sql)
                .bind(id)
                .bind(id)
                .fetch_one(self.pool.sqlite()?)
                .await,
            DatabaseDriver::Mysql => sqlx::query_scalar(sql)
                .bind(id)
                .bind(id)
                .fetch_one(self.pool.mysql()?)
                .await,
        }
        .context("Failed to check department references")?;
        Ok(count > 0)
    }

    async fn count(&self) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM departments";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query_scalar(sql).fetch_one(self.pool.sqlite()?).await,
            DatabaseDriver::Mysql => sqlx::query_scalar(sql).fetch_one(self.pool.mysql()?).await,
        }
        .context("Failed to count departments")
    }
}

fn row_to_department_sqlite(row: &SqliteRow) -> Department {
    Department {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        description: row.get("description"),
        active: row.get("active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_department_mysql(row: &MySqlRow) -> Department {
    Department {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        description: row.get("description"),
        active: row.get("active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
