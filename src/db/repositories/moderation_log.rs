//! Moderation log repository
//!
//! Append-only audit trail of review decisions and deletions.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{ListParams, ModerationAction, ModerationLogEntry, PagedResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{mysql::MySqlRow, sqlite::SqliteRow, Executor, MySql, Row, Sqlite};
use std::sync::Arc;

#[async_trait]
pub trait ModerationLogRepository: Send + Sync {
    async fn append(&self, entry: &ModerationLogEntry) -> Result<ModerationLogEntry>;

    /// Entries of one question, oldest first
    async fn list_for_question(&self, question_id: i64) -> Result<Vec<ModerationLogEntry>>;

    /// Entries across all questions, newest first
    async fn list(&self, params: &ListParams) -> Result<PagedResult<ModerationLogEntry>>;
}

pub struct SqlxModerationLogRepository {
    pool: DynDatabasePool,
}

impl SqlxModerationLogRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ModerationLogRepository> {
        Arc::new(Self::new(pool))
    }
}

const SELECT_ENTRIES: &str =
    "SELECT id, question_id, moderator_id, action, reason, created_at FROM moderation_log";

#[async_trait]
impl ModerationLogRepository for SqlxModerationLogRepository {
    async fn append(&self, entry: &ModerationLogEntry) -> Result<ModerationLogEntry> {
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => insert_entry_sqlite(self.pool.sqlite()?, entry).await?,
            DatabaseDriver::Mysql => insert_entry_mysql(self.pool.mysql()?, entry).await?,
        };
        Ok(ModerationLogEntry {
            id,
            ..entry.clone()
        })
    }

    async fn list_for_question(&self, question_id: i64) -> Result<Vec<ModerationLogEntry>> {
        let sql = format!("{} WHERE question_id = ? ORDER BY created_at, id", SELECT_ENTRIES);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(&sql)
                .bind(question_id)
                .fetch_all(self.pool.sqlite()?)
                .await
                .context("Failed to list moderation log")?
                .iter()
                .map(row_to_entry_sqlite)
                .collect(),
            DatabaseDriver::Mysql => sqlx::query(&sql)
                .bind(question_id)
                .fetch_all(self.pool.mysql()?)
                .await
                .context("Failed to list moderation log")?
                .iter()
                .map(row_to_entry_mysql)
                .collect(),
        }
    }

    async fn list(&self, params: &ListParams) -> Result<PagedResult<ModerationLogEntry>> {
        let sql = format!(
            "{} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            SELECT_ENTRIES
        );
        let count_sql = "SELECT COUNT(*) FROM moderation_log";
        let (items, total) = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let pool = self.pool.sqlite()?;
                let items = sqlx::query(&sql)
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(pool)
                    .await
                    .context("Failed to list moderation log")?
                    .iter()
                    .map(row_to_entry_sqlite)
                    .collect::<Result<Vec<_>>>()?;
                let total: i64 = sqlx::query_scalar(count_sql).fetch_one(pool).await?;
                (items, total)
            }
            DatabaseDriver::Mysql => {
                let pool = self.pool.mysql()?;
                let items = sqlx::query(&sql)
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(pool)
                    .await
                    .context("Failed to list moderation log")?
                    .iter()
                    .map(row_to_entry_mysql)
                    .collect::<Result<Vec<_>>>()?;
                let total: i64 = sqlx::query_scalar(count_sql).fetch_one(pool).await?;
                (items, total)
            }
        };
        Ok(PagedResult::new(items, total, params))
    }
}

const INSERT_ENTRY: &str = r#"
    INSERT INTO moderation_log (question_id, moderator_id, action, reason, created_at)
    VALUES (?, ?, ?, ?, ?)
"#;

/// Insert on a pool or inside a caller's transaction
pub(crate) async fn insert_entry_sqlite<'c, E>(executor: E, entry: &ModerationLogEntry) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let result = sqlx::query(INSERT_ENTRY)
        .bind(entry.question_id)
        .bind(entry.moderator_id)
        .bind(entry.action.to_string())
        .bind(entry.reason.clone())
        .bind(entry.created_at)
        .execute(executor)
        .await
        .context("Failed to append moderation log entry")?;
    Ok(result.last_insert_rowid())
}

pub(crate) async fn insert_entry_mysql<'c, E>(executor: E, entry: &ModerationLogEntry) -> Result<i64>
where
    E: Executor<'c, Database = MySql>,
{
    let result = sqlx::query(INSERT_ENTRY)
        .bind(entry.question_id)
        .bind(entry.moderator_id)
        .bind(entry.action.to_string())
        .bind(entry.reason.clone())
        .bind(entry.created_at)
        .execute(executor)
        .await
        .context("Failed to append moderation log entry")?;
    Ok(result.last_insert_id() as i64)
}

fn row_to_entry_sqlite(row: &SqliteRow) -> Result<ModerationLogEntry> {
    let action: String = row.get("action");
    Ok(ModerationLogEntry {
        id: row.get("id"),
        question_id: row.get("question_id"),
        moderator_id: row.get("moderator_id"),
        action: action.parse::<ModerationAction>()?,
        reason: row.get("reason"),
        created_at: row.get("created_at"),
    })
}

fn row_to_entry_mysql(row: &MySqlRow) -> Result<ModerationLogEntry> {
    let action: String = row.get("action");
    Ok(ModerationLogEntry {
        id: row.get("id"),
        question_id: row.get("question_id"),
        moderator_id: row.get("moderator_id"),
        action: action.parse::<ModerationAction>()?,
        reason: row.get("reason"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_append_and_list() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let moderator_id = sqlx::query(
            "INSERT INTO users (email, password_hash, role) VALUES ('m@uni.edu', 'h', 'moderator')",
        )
        .execute(pool.sqlite().unwrap())
        .await
        .unwrap()
        .last_insert_rowid();
        let repo = SqlxModerationLogRepository::new(pool);

        let now = Utc::now();
        for (i, action) in [ModerationAction::Rejected, ModerationAction::Deleted]
            .into_iter()
            .enumerate()
        {
            repo.append(&ModerationLogEntry {
                id: 0,
                question_id: None,
                moderator_id,
                action,
                reason: Some(format!("reason {}", i)),
                created_at: now + Duration::seconds(i as i64),
            })
            .await
            .unwrap();
        }

        let page = repo.list(&ListParams::default()).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].action, ModerationAction::Deleted);
        assert_eq!(page.items[1].reason.as_deref(), Some("reason 0"));
        assert!(repo.list_for_question(1).await.unwrap().is_empty());
    }
}
