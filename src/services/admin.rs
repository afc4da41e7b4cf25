//! Admin service
//!
//! Dashboard statistics, user roles, the full content inventory and hard
//! deletes. Taxonomy maintenance lives in [`crate::services::taxonomy`].

use crate::db::repositories::{
    DepartmentRepository, ModerationLogRepository, QuestionOrder, QuestionRepository, RoleChange,
    SessionRepository, UserRepository,
};
use crate::models::{
    ListParams, ModerationAction, ModerationLogEntry, PagedResult, QuestionFilter, QuestionStatus,
    QuestionWithMeta, User, UserRole,
};
use crate::services::storage::ObjectStore;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

const RECENT_ACTIVITY_LIMIT: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum AdminServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Admin role required")]
    Forbidden,

    #[error("Cannot remove the last admin")]
    LastAdmin,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    pub flagged: i64,
}

impl StatusCounts {
    fn from_rows(rows: &[(QuestionStatus, i64)]) -> Self {
        let mut counts = Self::default();
        for (status, n) in rows {
            match status {
                QuestionStatus::Pending => counts.pending += n,
                QuestionStatus::Approved => counts.approved += n,
                QuestionStatus::Rejected => counts.rejected += n,
                QuestionStatus::Flagged => counts.flagged += n,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityItem {
    pub question_id: i64,
    pub title: String,
    pub description: String,
    pub status: QuestionStatus,
    pub created_at: DateTime<Utc>,
}

impl ActivityItem {
    fn from_question(q: &QuestionWithMeta) -> Self {
        Self {
            question_id: q.question.id,
            title: format!("New question: {}", q.question.exam_year),
            description: format!(
                "A question for {} was uploaded.",
                q.department_name.as_deref().unwrap_or("unknown department")
            ),
            status: q.question.status,
            created_at: q.question.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminStats {
    pub total_users: i64,
    pub total_questions: i64,
    pub pending_questions: i64,
    pub total_departments: i64,
    pub by_status: StatusCounts,
    pub recent_activity: Vec<ActivityItem>,
}

pub struct AdminService {
    users: Arc<dyn UserRepository>,
    sessions: Arc<dyn SessionRepository>,
    questions: Arc<dyn QuestionRepository>,
    departments: Arc<dyn DepartmentRepository>,
    log: Arc<dyn ModerationLogRepository>,
    store: Arc<dyn ObjectStore>,
}

impl AdminService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        sessions: Arc<dyn SessionRepository>,
        questions: Arc<dyn QuestionRepository>,
        departments: Arc<dyn DepartmentRepository>,
        log: Arc<dyn ModerationLogRepository>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            users,
            sessions,
            questions,
            departments,
            log,
            store,
        }
    }

    pub async fn stats(&self) -> Result<AdminStats, AdminServiceError> {
        let total_users = self.users.count().await.context("Failed to count users")?;
        let by_status = StatusCounts::from_rows(
            &self
                .questions
                .count_by_status()
                .await
                .context("Failed to count questions")?,
        );
        let total_departments = self
            .departments
            .count()
            .await
            .context("Failed to count departments")?;

        let recent = self
            .questions
            .list(
                &QuestionFilter::default(),
                QuestionOrder::NewestFirst,
                &ListParams::new(1, RECENT_ACTIVITY_LIMIT),
            )
            .await
            .context("Failed to load recent questions")?;

        Ok(AdminStats {
            total_users,
            total_questions: by_status.pending
                + by_status.approved
                + by_status.rejected
                + by_status.flagged,
            pending_questions: by_status.pending,
            total_departments,
            by_status,
            recent_activity: recent.items.iter().map(ActivityItem::from_question).collect(),
        })
    }

    /// Accounts, newest first
    pub async fn list_users(&self, params: &ListParams) -> Result<PagedResult<User>, AdminServiceError> {
        let items = self.users.list(params).await.context("Failed to list users")?;
        let total = self.users.count().await.context("Failed to count users")?;
        Ok(PagedResult::new(items, total, params))
    }

    /// Change a user's role and sign them out everywhere.
    ///
    /// The last remaining admin cannot be demoted.
    pub async fn update_user_role(
        &self,
        actor: &User,
        user_id: i64,
        role: UserRole,
    ) -> Result<User, AdminServiceError> {
        if !actor.is_admin() {
            return Err(AdminServiceError::Forbidden);
        }

        let target = self
            .users
            .get_by_id(user_id)
            .await
            .context("Failed to load user")?
            .ok_or_else(|| AdminServiceError::NotFound("User".into()))?;
        if target.role == role {
            return Ok(target);
        }

        match self
            .users
            .update_role(user_id, role)
            .await
            .context("Failed to update role")?
        {
            RoleChange::Updated => {}
            RoleChange::NotFound => return Err(AdminServiceError::NotFound("User".into())),
            RoleChange::LastAdmin => return Err(AdminServiceError::LastAdmin),
        }
        let closed = self
            .sessions
            .delete_by_user(user_id)
            .await
            .context("Failed to invalidate sessions")?;

        tracing::info!(
            "Admin {} changed role of user {} from {} to {} ({} sessions closed)",
            actor.id,
            user_id,
            target.role,
            role,
            closed
        );

        self.users
            .get_by_id(user_id)
            .await
            .context("Failed to reload user")?
            .ok_or_else(|| AdminServiceError::NotFound("User".into()))
    }

    /// Every question regardless of state, optionally narrowed to one status
    pub async fn list_content(
        &self,
        status: Option<QuestionStatus>,
        params: &ListParams,
    ) -> Result<PagedResult<QuestionWithMeta>, AdminServiceError> {
        let filter = QuestionFilter {
            status,
            ..Default::default()
        };
        Ok(self
            .questions
            .list(&filter, QuestionOrder::NewestFirst, params)
            .await
            .context("Failed to list content")?)
    }

    /// Permanently remove a question and its image.
    pub async fn delete_question(&self, actor: &User, id: i64) -> Result<(), AdminServiceError> {
        if !actor.is_admin() {
            return Err(AdminServiceError::Forbidden);
        }

        let question = self
            .questions
            .get_by_id(id)
            .await
            .context("Failed to load question")?
            .ok_or_else(|| AdminServiceError::NotFound("Question".into()))?;

        let entry = ModerationLogEntry {
            id: 0,
            question_id: Some(id),
            moderator_id: actor.id,
            action: ModerationAction::Deleted,
            reason: Some(format!(
                "Question #{} ({} {}, {})",
                id,
                question.course_code.as_deref().unwrap_or("paper"),
                question.exam_year,
                question.status
            )),
            created_at: Utc::now(),
        };
        if !self
            .questions
            .delete(id, &entry)
            .await
            .context("Failed to delete question")?
        {
            return Err(AdminServiceError::NotFound("Question".into()));
        }

        if let Err(e) = self.store.delete(&question.storage_key).await {
            tracing::warn!("Failed to delete image {} of question {}: {}", question.storage_key, id, e);
        }

        tracing::info!("Admin {} deleted question {}", actor.id, id);
        Ok(())
    }

    pub async fn moderation_log(
        &self,
        params: &ListParams,
    ) -> Result<PagedResult<ModerationLogEntry>, AdminServiceError> {
        Ok(self
            .log
            .list(params)
            .await
            .context("Failed to load moderation log")?)
    }
}
