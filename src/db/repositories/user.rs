//! User repository
//!
//! Database operations for user accounts.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{ListParams, User, UserRole};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{mysql::MySqlRow, sqlite::SqliteRow, MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Outcome of [`UserRepository::update_role`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleChange {
    Updated,
    NotFound,
    /// Refused because the user is the only remaining admin
    LastAdmin,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User) -> Result<User>;

    /// Insert a self-registered account.
    ///
    /// The account becomes admin when the table is empty, otherwise it keeps
    /// `user.role`. The check is part of the insert statement, so concurrent
    /// first sign-ups cannot both become admin.
    async fn create_account(&self, user: &User) -> Result<User>;

    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Lookup by email; callers pass the normalized (lowercase) address
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// List users, newest first
    async fn list(&self, params: &ListParams) -> Result<Vec<User>>;

    async fn count(&self) -> Result<i64>;

    async fn count_by_role(&self, role: UserRole) -> Result<i64>;

    /// Change a role unless that would leave no admin
    async fn update_role(&self, id: i64, role: UserRole) -> Result<RoleChange>;

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()>;

    async fn set_email_verified(&self, id: i64, verified: bool) -> Result<()>;
}

pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

const USER_COLUMNS: &str = "id, email, password_hash, role, email_verified, created_at, updated_at";

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => create_user_sqlite(self.pool.sqlite()?, user).await?,
            DatabaseDriver::Mysql => create_user_mysql(self.pool.mysql()?, user).await?,
        };
        Ok(User { id, ..user.clone() })
    }

    async fn create_account(&self, user: &User) -> Result<User> {
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => create_account_sqlite(self.pool.sqlite()?, user).await?,
            DatabaseDriver::Mysql => create_account_mysql(self.pool.mysql()?, user).await?,
        };
        self.get_by_id(id)
            .await?
            .ok_or_else(|| anyhow!("User {} missing after insert", id))
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.pool.sqlite()?)
                    .await
                    .context("Failed to get user by ID")?;
                row.as_ref().map(row_to_user_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(self.pool.mysql()?)
                    .await
                    .context("Failed to get user by ID")?;
                row.as_ref().map(row_to_user_mysql).transpose()
            }
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS);
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let row = sqlx::query(&sql)
                    .bind(email)
                    .fetch_optional(self.pool.sqlite()?)
                    .await
                    .context("Failed to get user by email")?;
                row.as_ref().map(row_to_user_sqlite).transpose()
            }
            DatabaseDriver::Mysql => {
                let row = sqlx::query(&sql)
                    .bind(email)
                    .fetch_optional(self.pool.mysql()?)
                    .await
                    .context("Failed to get user by email")?;
                row.as_ref().map(row_to_user_mysql).transpose()
            }
        }
    }

    async fn list(&self, params: &ListParams) -> Result<Vec<User>> {
        let sql = format!(
            "SELECT {} FROM users ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            USER_COLUMNS
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                let rows = sqlx::query(&sql)
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(self.pool.sqlite()?)
                    .await
                    .context("Failed to list users")?;
                rows.iter().map(row_to_user_sqlite).collect()
            }
            DatabaseDriver::Mysql => {
                let rows = sqlx::query(&sql)
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(self.pool.mysql()?)
                    .await
                    .context("Failed to list users")?;
                rows.iter().map(row_to_user_mysql).collect()
            }
        }
    }

    async fn count(&self) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM users";
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query_scalar::<_, i64>(sql)
                    .fetch_one(self.pool.sqlite()?)
                    .await
            }
            DatabaseDriver::Mysql => {
                sqlx::query_scalar::<_, i64>(sql)
                    .fetch_one(self.pool.mysql()?)
                    .await
            }
        };
        count.context("Failed to count users")
    }

    async fn count_by_role(&self, role: UserRole) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM users WHERE role = ?";
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query_scalar::<_, i64>(sql)
                    .bind(role.to_string())
                    .fetch_one(self.pool.sqlite()?)
                    .await
            }
            DatabaseDriver::Mysql => {
                sqlx::query_scalar::<_, i64>(sql)
                    .bind(role.to_string())
                    .fetch_one(self.pool.mysql()?)
                    .await
            }
        };
        count.context("Failed to count users by role")
    }

    async fn update_role(&self, id: i64, role: UserRole) -> Result<RoleChange> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => update_role_sqlite(self.pool.sqlite()?, id, role).await,
            DatabaseDriver::Mysql => update_role_mysql(self.pool.mysql()?, id, role).await,
        }
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()> {
        let sql = "UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(password_hash)
                .bind(Utc::now())
                .bind(id)
                .execute(self.pool.sqlite()?)
                .await
                .map(|_| ()),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(password_hash)
                .bind(Utc::now())
                .bind(id)
                .execute(self.pool.mysql()?)
                .await
                .map(|_| ()),
        }
        .context("Failed to update password")
    }

    async fn set_email_verified(&self, id: i64, verified: bool) -> Result<()> {
        let sql = "UPDATE users SET email_verified = ?, updated_at = ? WHERE id = ?";
        match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(sql)
                .bind(verified)
                .bind(Utc::now())
                .bind(id)
                .execute(self.pool.sqlite()?)
                .await
                .map(|_| ()),
            DatabaseDriver::Mysql => sqlx::query(sql)
                .bind(verified)
                .bind(Utc::now())
                .bind(id)
                .execute(self.pool.mysql()?)
                .await
                .map(|_| ()),
        }
        .context("Failed to update email verification")
    }
}

const INSERT_USER: &str = r#"
    INSERT INTO users (email, password_hash, role, email_verified, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?)
"#;

const INSERT_ACCOUNT: &str = r#"
    INSERT INTO users (email, password_hash, role, email_verified, created_at, updated_at)
    SELECT ?, ?, CASE WHEN COUNT(*) = 0 THEN 'admin' ELSE ? END, ?, ?, ?
    FROM users
"#;

/// Single statement, so SQLite's write lock covers the admin count
const UPDATE_ROLE_GUARDED: &str = r#"
    UPDATE users SET role = ?, updated_at = ?
    WHERE id = ?
      AND (role <> 'admin' OR ? = 'admin'
           OR (SELECT COUNT(*) FROM users WHERE role = 'admin') > 1)
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_user_sqlite(pool: &SqlitePool, user: &User) -> Result<i64> {
    let result = sqlx::query(INSERT_USER)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.to_string())
        .bind(user.email_verified)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(pool)
        .await
        .context("Failed to create user")?;
    Ok(result.last_insert_rowid())
}

async fn create_account_sqlite(pool: &SqlitePool, user: &User) -> Result<i64> {
    let result = sqlx::query(INSERT_ACCOUNT)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.to_string())
        .bind(user.email_verified)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(pool)
        .await
        .context("Failed to create user")?;
    Ok(result.last_insert_rowid())
}

async fn update_role_sqlite(pool: &SqlitePool, id: i64, role: UserRole) -> Result<RoleChange> {
    let role = role.to_string();
    let affected = sqlx::query(UPDATE_ROLE_GUARDED)
        .bind(&role)
        .bind(Utc::now())
        .bind(id)
        .bind(&role)
        .execute(pool)
        .await
        .context("Failed to update user role")?
        .rows_affected();
    if affected > 0 {
        return Ok(RoleChange::Updated);
    }

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by ID")?;
    Ok(if exists.is_some() {
        RoleChange::LastAdmin
    } else {
        RoleChange::NotFound
    })
}

fn row_to_user_sqlite(row: &SqliteRow) -> Result<User> {
    let role: String = row.get("role");
    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role: role.parse().unwrap_or_default(),
        email_verified: row.get("email_verified"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_user_mysql(pool: &MySqlPool, user: &User) -> Result<i64> {
    let result = sqlx::query(INSERT_USER)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.to_string())
        .bind(user.email_verified)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(pool)
        .await
        .context("Failed to create user")?;
    Ok(result.last_insert_id() as i64)
}

async fn create_account_mysql(pool: &MySqlPool, user: &User) -> Result<i64> {
    let result = sqlx::query(INSERT_ACCOUNT)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.to_string())
        .bind(user.email_verified)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(pool)
        .await
        .context("Failed to create user")?;
    Ok(result.last_insert_id() as i64)
}

/// MySQL rejects a subquery on the table being updated, so the admin rows are
/// locked and counted inside a transaction instead.
async fn update_role_mysql(pool: &MySqlPool, id: i64, role: UserRole) -> Result<RoleChange> {
    let mut tx = pool.begin().await.context("Failed to start transaction")?;

    let current: Option<String> = sqlx::query_scalar("SELECT role FROM users WHERE id = ? FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to get user by ID")?;
    let Some(current) = current else {
        return Ok(RoleChange::NotFound);
    };

    if current == "admin" && role != UserRole::Admin {
        let admins: Vec<i64> = sqlx::query_scalar("SELECT id FROM users WHERE role = 'admin' FOR UPDATE")
            .fetch_all(&mut *tx)
            .await
            .context("Failed to count admins")?;
        if admins.len() <= 1 {
            return Ok(RoleChange::LastAdmin);
        }
    }

    sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
        .bind(role.to_string())
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to update user role")?;
    tx.commit().await.context("Failed to commit role change")?;
    Ok(RoleChange::Updated)
}

fn row_to_user_mysql(row: &MySqlRow) -> Result<User> {
    let role: String = row.get("role");
    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role: role.parse().unwrap_or_default(),
        email_verified: row.get("email_verified"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_repo() -> SqlxUserRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxUserRepository::new(pool)
    }

    fn test_user(email: &str, role: UserRole) -> User {
        User::new(email.to_string(), "hash".to_string(), role)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = setup_test_repo().await;
        let created = repo
            .create(&test_user("alice@uni.edu", UserRole::Student))
            .await
            .unwrap();
        assert!(created.id > 0);

        let by_id = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "alice@uni.edu");
        assert_eq!(by_id.role, UserRole::Student);
        assert!(!by_id.email_verified);

        let by_email = repo.get_by_email("alice@uni.edu").await.unwrap();
        assert_eq!(by_email.map(|u| u.id), Some(created.id));
        assert!(repo.get_by_email("bob@uni.edu").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let repo = setup_test_repo().await;
        repo.create(&test_user("dup@uni.edu", UserRole::Student))
            .await
            .unwrap();
        assert!(repo
            .create(&test_user("dup@uni.edu", UserRole::Admin))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_role_counts_and_update() {
        let repo = setup_test_repo().await;
        let admin = repo
            .create(&test_user("admin@uni.edu", UserRole::Admin))
            .await
            .unwrap();
        let student = repo
            .create(&test_user("s@uni.edu", UserRole::Student))
            .await
            .unwrap();

        assert_eq!(repo.count().await.unwrap(), 2);
        assert_eq!(repo.count_by_role(UserRole::Admin).await.unwrap(), 1);

        assert_eq!(
            repo.update_role(student.id, UserRole::Moderator).await.unwrap(),
            RoleChange::Updated
        );
        assert_eq!(
            repo.update_role(999, UserRole::Moderator).await.unwrap(),
            RoleChange::NotFound
        );
        assert_eq!(repo.count_by_role(UserRole::Moderator).await.unwrap(), 1);
        assert_eq!(
            repo.get_by_id(admin.id).await.unwrap().unwrap().role,
            UserRole::Admin
        );
    }

    #[tokio::test]
    async fn test_list_newest_first_with_paging() {
        let repo = setup_test_repo().await;
        for i in 0..3 {
            let mut user = test_user(&format!("u{}@uni.edu", i), UserRole::Student);
            user.created_at = Utc::now() + chrono::Duration::seconds(i);
            repo.create(&user).await.unwrap();
        }

        let first = repo.list(&ListParams::new(1, 2)).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].email, "u2@uni.edu");

        let second = repo.list(&ListParams::new(2, 2)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].email, "u0@uni.edu");
    }

    #[tokio::test]
    async fn test_password_and_verification_updates() {
        let repo = setup_test_repo().await;
        let user = repo
            .create(&test_user("v@uni.edu", UserRole::Student))
            .await
            .unwrap();

        repo.update_password(user.id, "new-hash").await.unwrap();
        repo.set_email_verified(user.id, true).await.unwrap();

        let loaded = repo.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(loaded.password_hash, "new-hash");
        assert!(loaded.email_verified);
    }

    #[tokio::test]
    async fn test_last_admin_cannot_be_demoted() {
        let repo = setup_test_repo().await;
        let first = repo
            .create(&test_user("a1@uni.edu", UserRole::Admin))
            .await
            .unwrap();
        let second = repo
            .create(&test_user("a2@uni.edu", UserRole::Admin))
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            repo.update_role(first.id, UserRole::Student),
            repo.update_role(second.id, UserRole::Student)
        );
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| *o == RoleChange::LastAdmin);
        assert_eq!(outcomes, vec![RoleChange::Updated, RoleChange::LastAdmin]);
        assert_eq!(repo.count_by_role(UserRole::Admin).await.unwrap(), 1);

        let remaining = if repo.get_by_id(first.id).await.unwrap().unwrap().is_admin() {
            first.id
        } else {
            second.id
        };
        // promoting or keeping an admin is always allowed
        assert_eq!(
            repo.update_role(remaining, UserRole::Admin).await.unwrap(),
            RoleChange::Updated
        );
    }

    #[tokio::test]
    async fn test_create_account_promotes_only_the_first() {
        let repo = setup_test_repo().await;
        let (ux, uy) = (
            test_user("x@uni.edu", UserRole::Student),
            test_user("y@uni.edu", UserRole::Student),
        );
        let (a, b) = tokio::join!(repo.create_account(&ux), repo.create_account(&uy));
        let roles = [a.unwrap().role, b.unwrap().role];
        assert_eq!(roles.iter().filter(|r| **r == UserRole::Admin).count(), 1);
        assert_eq!(roles.iter().filter(|r| **r == UserRole::Student).count(), 1);

        let later = repo
            .create_account(&test_user("z@uni.edu", UserRole::Student))
            .await
            .unwrap();
        assert_eq!(later.role, UserRole::Student);
    }
}
