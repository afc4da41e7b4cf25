//! Password reset token repository

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::PasswordReset;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

#[async_trait]
pub trait PasswordResetRepository: Send + Sync {
    async fn create(&self, reset: &PasswordReset) -> Result<()>;

    /// Remove the token and return it, so a token can be used only once
    async fn take(&self, token_hash: &str) -> Result<Option<PasswordReset>>;

    async fn delete_expired(&self) -> Result<u64>;
}

pub struct SqlxPasswordResetRepository {
    pool: DynDatabasePool,
}

impl SqlxPasswordResetRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PasswordResetRepository> {
        Arc::new(Self::new(pool))
    }
}

const INSERT_RESET: &str =
    "INSERT INTO password_resets (token_hash, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)";
const SELECT_RESET: &str =
    "SELECT token_hash, user_id, expires_at, created_at FROM password_resets WHERE token_hash = ?";
const DELETE_RESET: &str = "DELETE FROM password_resets WHERE token_hash = ?";
const DELETE_EXPIRED: &str = "DELETE FROM password_resets WHERE expires_at < ?";

#[async_trait]
impl PasswordResetRepository for SqlxPasswordResetRepository {
    async fn create(&self, reset: &PasswordReset) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_reset_sqlite(self.pool.sqlite()?, reset).await,
            DatabaseDriver::Mysql => create_reset_mysql(self.pool.mysql()?, reset).await,
        }
    }

    async fn take(&self, token_hash: &str) -> Result<Option<PasswordReset>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => take_reset_sqlite(self.pool.sqlite()?, token_hash).await,
            DatabaseDriver::Mysql => take_reset_mysql(self.pool.mysql()?, token_hash).await,
        }
    }

    async fn delete_expired(&self) -> Result<u64> {
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(DELETE_EXPIRED)
                .bind(Utc::now())
                .execute(self.pool.sqlite()?)
                .await
                .map(|r| r.rows_affected()),
            DatabaseDriver::Mysql => sqlx::query(DELETE_EXPIRED)
                .bind(Utc::now())
                .execute(self.pool.mysql()?)
                .await
                .map(|r| r.rows_affected()),
        };
        affected.context("Failed to delete expired password resets")
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_reset_sqlite(pool: &SqlitePool, reset: &PasswordReset) -> Result<()> {
    sqlx::query(INSERT_RESET)
        .bind(&reset.token_hash)
        .bind(reset.user_id)
        .bind(reset.expires_at)
        .bind(reset.created_at)
        .execute(pool)
        .await
        .context("Failed to store password reset")?;
    Ok(())
}

async fn take_reset_sqlite(pool: &SqlitePool, token_hash: &str) -> Result<Option<PasswordReset>> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query(SELECT_RESET)
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to load password reset")?;
    let Some(row) = row else {
        return Ok(None);
    };
    sqlx::query(DELETE_RESET)
        .bind(token_hash)
        .execute(&mut *tx)
        .await
        .context("Failed to consume password reset")?;
    tx.commit().await?;

    Ok(Some(PasswordReset {
        token_hash: row.get("token_hash"),
        user_id: row.get("user_id"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }))
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_reset_mysql(pool: &MySqlPool, reset: &PasswordReset) -> Result<()> {
    sqlx::query(INSERT_RESET)
        .bind(&reset.token_hash)
        .bind(reset.user_id)
        .bind(reset.expires_at)
        .bind(reset.created_at)
        .execute(pool)
        .await
        .context("Failed to store password reset")?;
    Ok(())
}

async fn take_reset_mysql(pool: &MySqlPool, token_hash: &str) -> Result<Option<PasswordReset>> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query(&format!("{} FOR UPDATE", SELECT_RESET))
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to load password reset")?;
    let Some(row) = row else {
        return Ok(None);
    };
    sqlx::query(DELETE_RESET)
        .bind(token_hash)
        .execute(&mut *tx)
        .await
        .context("Failed to consume password reset")?;
    tx.commit().await?;

    Ok(Some(PasswordReset {
        token_hash: row.get("token_hash"),
        user_id: row.get("user_id"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }))
}
