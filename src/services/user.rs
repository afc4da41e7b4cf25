//! User service
//!
//! Accounts, sessions and password recovery:
//! - registration (the first account becomes admin)
//! - login with rate limiting, logout and session validation
//! - forgot / reset / change password

use crate::config::AuthConfig;
use crate::db::repositories::{PasswordResetRepository, SessionRepository, UserRepository};
use crate::models::{PasswordReset, Session, User, UserRole};
use crate::services::email::{Mailer, OutgoingMail};
use crate::services::password::{
    generate_reset_token, generate_session_token, hash_password, hash_token, verify_password,
};
use crate::services::rate_limiter::LoginRateLimiter;
use anyhow::Context;
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use std::sync::Arc;

const RESET_TOKEN_TTL_HOURS: i64 = 1;

static EMAIL_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());

/// Loose shape check for an email address
pub fn is_valid_email(email: &str) -> bool {
    email.len() <= 254 && EMAIL_RE.as_ref().is_some_and(|re| re.is_match(email))
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("Registration is closed")]
    RegistrationClosed,

    #[error("{0}")]
    RateLimited(String),

    #[error("Invalid or expired reset token")]
    InvalidToken,

    #[error("User not found")]
    NotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
}

impl RegisterInput {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

impl LoginInput {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResetPasswordInput {
    pub token: String,
    pub password: String,
    pub confirm_password: String,
}

pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    reset_repo: Arc<dyn PasswordResetRepository>,
    mailer: Arc<dyn Mailer>,
    rate_limiter: Arc<LoginRateLimiter>,
    config: AuthConfig,
}

impl UserService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        reset_repo: Arc<dyn PasswordResetRepository>,
        mailer: Arc<dyn Mailer>,
        rate_limiter: Arc<LoginRateLimiter>,
        config: AuthConfig,
    ) -> Self {
        Self {
            user_repo,
            session_repo,
            reset_repo,
            mailer,
            rate_limiter,
            config,
        }
    }

    pub fn session_days(&self) -> i64 {
        self.config.session_days
    }

    fn check_password_length(&self, password: &str) -> Result<(), UserServiceError> {
        if password.chars().count() < self.config.min_password_length {
            return Err(UserServiceError::ValidationError(format!(
                "Password must be at least {} characters",
                self.config.min_password_length
            )));
        }
        Ok(())
    }

    /// Register a new account.
    ///
    /// The first account is created as admin even when registration is
    /// otherwise disabled; every later account is a student.
    pub async fn register(&self, input: RegisterInput) -> Result<User, UserServiceError> {
        let email = normalize_email(&input.email);
        if !is_valid_email(&email) {
            return Err(UserServiceError::ValidationError(
                "Please enter a valid email address".to_string(),
            ));
        }
        self.check_password_length(&input.password)?;

        let first = self.is_first_user().await?;
        if !first && !self.config.allow_registration {
            return Err(UserServiceError::RegistrationClosed);
        }

        if self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to look up email")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(email));
        }

        let password_hash = hash_password(&input.password)?;
        let user = self
            .user_repo
            .create_account(&User::new(email, password_hash, UserRole::Student))
            .await
            .context("Failed to create user")?;

        tracing::info!("Registered user {} as {}", user.id, user.role);
        Ok(user)
    }

    /// Verify credentials and open a session.
    pub async fn login(
        &self,
        input: LoginInput,
        ip: Option<IpAddr>,
    ) -> Result<(Session, User), UserServiceError> {
        let email = normalize_email(&input.email);

        if let Some(ip) = ip {
            if self.rate_limiter.is_ip_limited(ip).await {
                tracing::warn!("Login rate limit hit for IP {}", ip);
                return Err(UserServiceError::RateLimited(
                    "Too many requests. Please try again in a minute.".to_string(),
                ));
            }
            self.rate_limiter.record_ip_request(ip).await;
        }

        if self.rate_limiter.is_email_limited(&email).await {
            tracing::warn!("Login rate limit hit for {}", email);
            return Err(UserServiceError::RateLimited(
                "Too many failed login attempts. Please try again in 15 minutes.".to_string(),
            ));
        }

        let user = match self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to look up user")?
        {
            Some(user) if verify_password(&input.password, &user.password_hash)? => user,
            _ => {
                self.rate_limiter.record_failed_attempt(&email).await;
                return Err(UserServiceError::AuthenticationError(
                    "Invalid email or password".to_string(),
                ));
            }
        };

        self.rate_limiter.clear_email_attempts(&email).await;
        let session = self.create_session(user.id).await?;
        Ok((session, user))
    }

    pub async fn logout(&self, token: &str) -> Result<(), UserServiceError> {
        self.session_repo
            .delete(token)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, UserServiceError> {
        Ok(self
            .user_repo
            .get_by_id(id)
            .await
            .context("Failed to get user by ID")?)
    }

    /// Resolve a session token to its user. Expired sessions are removed.
    pub async fn validate_session(&self, token: &str) -> Result<Option<User>, UserServiceError> {
        let session = match self
            .session_repo
            .get_by_id(token)
            .await
            .context("Failed to get session")?
        {
            Some(s) => s,
            None => return Ok(None),
        };

        if session.is_expired() {
            let _ = self.session_repo.delete(token).await;
            return Ok(None);
        }

        Ok(self
            .user_repo
            .get_by_id(session.user_id)
            .await
            .context("Failed to get user")?)
    }

    pub async fn is_first_user(&self) -> Result<bool, UserServiceError> {
        let count = self.user_repo.count().await.context("Failed to count users")?;
        Ok(count == 0)
    }

    /// Start a password reset.
    ///
    /// Always succeeds so callers cannot learn which emails are registered.
    pub async fn forgot_password(&self, email: &str) -> Result<(), UserServiceError> {
        let email = normalize_email(email);
        let user = match self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to look up user")?
        {
            Some(user) => user,
            None => {
                tracing::debug!("Password reset requested for unknown email");
                return Ok(());
            }
        };

        let token = generate_reset_token();
        let now = Utc::now();
        self.reset_repo
            .create(&PasswordReset {
                token_hash: hash_token(&token),
                user_id: user.id,
                expires_at: now + Duration::hours(RESET_TOKEN_TTL_HOURS),
                created_at: now,
            })
            .await
            .context("Failed to store reset token")?;

        if !self.mailer.is_configured() {
            tracing::debug!("Email not configured; reset token for user {}: {}", user.id, token);
            return Ok(());
        }

        let mail = OutgoingMail {
            to: user.email.clone(),
            subject: "Reset your password".to_string(),
            body: format!(
                "A password reset was requested for your account.\n\n\
                 Reset token: {}\n\n\
                 The token expires in {} hour. If you did not ask for this, ignore this email.",
                token, RESET_TOKEN_TTL_HOURS
            ),
            reply_to: None,
        };
        if let Err(e) = self.mailer.send(mail).await {
            tracing::warn!("Failed to send reset email to user {}: {}", user.id, e);
        }
        Ok(())
    }

    /// Finish a password reset. Every session of the user is closed.
    pub async fn reset_password(&self, input: ResetPasswordInput) -> Result<(), UserServiceError> {
        if input.password != input.confirm_password {
            return Err(UserServiceError::ValidationError(
                "Passwords do not match".to_string(),
            ));
        }
        self.check_password_length(&input.password)?;

        let reset = self
            .reset_repo
            .take(&hash_token(input.token.trim()))
            .await
            .context("Failed to load reset token")?
            .ok_or(UserServiceError::InvalidToken)?;
        if reset.is_expired() {
            return Err(UserServiceError::InvalidToken);
        }

        let password_hash = hash_password(&input.password)?;
        self.user_repo
            .update_password(reset.user_id, &password_hash)
            .await
            .context("Failed to update password")?;
        // the reset token arrived by mail, so the address is proven
        self.user_repo
            .set_email_verified(reset.user_id, true)
            .await
            .context("Failed to mark email verified")?;
        let closed = self
            .session_repo
            .delete_by_user(reset.user_id)
            .await
            .context("Failed to invalidate sessions")?;

        tracing::info!("Password reset for user {} ({} sessions closed)", reset.user_id, closed);
        Ok(())
    }

    pub async fn change_password(
        &self,
        user_id: i64,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), UserServiceError> {
        let user = self.get_by_id(user_id).await?.ok_or(UserServiceError::NotFound)?;

        if !verify_password(current_password, &user.password_hash)? {
            return Err(UserServiceError::AuthenticationError(
                "Current password is incorrect".to_string(),
            ));
        }
        self.check_password_length(new_password)?;

        let password_hash = hash_password(new_password)?;
        self.user_repo
            .update_password(user_id, &password_hash)
            .await
            .context("Failed to update password")?;
        Ok(())
    }

    /// Purge expired sessions and reset tokens
    pub async fn cleanup_expired(&self) -> Result<(u64, u64), UserServiceError> {
        let sessions = self
            .session_repo
            .delete_expired()
            .await
            .context("Failed to delete expired sessions")?;
        let resets = self
            .reset_repo
            .delete_expired()
            .await
            .context("Failed to delete expired reset tokens")?;
        Ok((sessions, resets))
    }

    async fn create_session(&self, user_id: i64) -> Result<Session, UserServiceError> {
        let now = Utc::now();
        let session = Session {
            id: generate_session_token(),
            user_id,
            expires_at: now + Duration::days(self.config.session_days),
            created_at: now,
        };
        Ok(self
            .session_repo
            .create(&session)
            .await
            .context("Failed to create session")?)
    }
}
