//! Moderation service
//!
//! Reviews pending uploads. A question leaves `pending` exactly once, to
//! `approved`, `rejected` or `flagged`. The repository applies the
//! conditional update and its log entry in one transaction, so of two
//! moderators racing on the same upload only one wins and only one entry is
//! written.

use crate::db::repositories::{
    ModerationLogRepository, QuestionOrder, QuestionRepository, ReviewUpdate,
};
use crate::models::{
    ListParams, ModerationLogEntry, PagedResult, QuestionFilter, QuestionStatus, QuestionWithMeta,
    User,
};
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;

pub const MAX_REASON_LEN: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum ModerationServiceError {
    #[error("Question not found")]
    NotFound,

    #[error("Question has already been reviewed ({0})")]
    AlreadyReviewed(QuestionStatus),

    #[error("Moderator role required")]
    Forbidden,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Trim a review reason; blank means no reason.
pub fn normalize_reason(reason: Option<&str>) -> Result<Option<String>, ModerationServiceError> {
    let reason = reason.map(str::trim).filter(|r| !r.is_empty());
    match reason {
        Some(r) if r.chars().count() > MAX_REASON_LEN => Err(ModerationServiceError::ValidationError(
            format!("Reason must be at most {} characters", MAX_REASON_LEN),
        )),
        other => Ok(other.map(str::to_string)),
    }
}

pub struct ModerationService {
    questions: Arc<dyn QuestionRepository>,
    log: Arc<dyn ModerationLogRepository>,
}

impl ModerationService {
    pub fn new(
        questions: Arc<dyn QuestionRepository>,
        log: Arc<dyn ModerationLogRepository>,
    ) -> Self {
        Self { questions, log }
    }

    /// Pending queue, longest-waiting first
    pub async fn list_pending(
        &self,
        params: &ListParams,
    ) -> Result<PagedResult<QuestionWithMeta>, ModerationServiceError> {
        let filter = QuestionFilter {
            status: Some(QuestionStatus::Pending),
            ..Default::default()
        };
        Ok(self
            .questions
            .list(&filter, QuestionOrder::OldestFirst, params)
            .await
            .context("Failed to list pending questions")?)
    }

    pub async fn approve(
        &self,
        moderator: &User,
        id: i64,
    ) -> Result<QuestionWithMeta, ModerationServiceError> {
        self.transition(moderator, id, QuestionStatus::Approved, None).await
    }

    pub async fn reject(
        &self,
        moderator: &User,
        id: i64,
        reason: Option<&str>,
    ) -> Result<QuestionWithMeta, ModerationServiceError> {
        let reason = normalize_reason(reason)?;
        self.transition(moderator, id, QuestionStatus::Rejected, reason)
            .await
    }

    pub async fn flag(
        &self,
        moderator: &User,
        id: i64,
        reason: Option<&str>,
    ) -> Result<QuestionWithMeta, ModerationServiceError> {
        let reason = normalize_reason(reason)?;
        self.transition(moderator, id, QuestionStatus::Flagged, reason)
            .await
    }

    /// Review history of one question, oldest first
    pub async fn history(
        &self,
        question_id: i64,
    ) -> Result<Vec<ModerationLogEntry>, ModerationServiceError> {
        Ok(self
            .log
            .list_for_question(question_id)
            .await
            .context("Failed to load moderation history")?)
    }

    async fn transition(
        &self,
        moderator: &User,
        id: i64,
        target: QuestionStatus,
        reason: Option<String>,
    ) -> Result<QuestionWithMeta, ModerationServiceError> {
        if !moderator.can_moderate() {
            return Err(ModerationServiceError::Forbidden);
        }

        let now = Utc::now();
        let update = ReviewUpdate {
            status: target,
            reviewer_id: moderator.id,
            rejection_reason: if target == QuestionStatus::Approved {
                None
            } else {
                reason
            },
            reviewed_at: now,
        };

        let applied = self
            .questions
            .review(id, QuestionStatus::Pending, &update)
            .await
            .context("Failed to apply review")?;

        if !applied {
            return match self
                .questions
                .get_by_id(id)
                .await
                .context("Failed to load question")?
            {
                Some(q) => Err(ModerationServiceError::AlreadyReviewed(q.status)),
                None => Err(ModerationServiceError::NotFound),
            };
        }

        tracing::info!("Moderator {} moved question {} to {}", moderator.id, id, target);

        self.questions
            .get_with_meta(id)
            .await
            .context("Failed to reload question")?
            .ok_or(ModerationServiceError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{
        SqlxModerationLogRepository, SqlxQuestionRepository, SqlxUserRepository, UserRepository,
    };
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use crate::models::{ModerationAction, UserRole};
    use crate::services::question::test_support::{png, question_service, seed, Seed};
    use crate::services::storage::LocalObjectStore;

    struct Fixture {
        _dir: tempfile::TempDir,
        service: ModerationService,
        seed: Seed,
        moderator: User,
        pending: Vec<i64>,
    }

    async fn setup() -> Fixture {
        let pool: DynDatabasePool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let dir = tempfile::tempdir().unwrap();
        let questions = question_service(&pool, LocalObjectStore::new(dir.path(), "/uploads").boxed());
        let seed = seed(&pool).await;

        let mut pending = Vec::new();
        for year in [2019, 2020, 2021] {
            let q = questions
                .upload(&seed.contributor, &seed.input(year), png(b"img"))
                .await
                .unwrap();
            pending.push(q.id);
        }

        let moderator = SqlxUserRepository::new(pool.clone())
            .create(&User::new("mod@uni.edu".into(), "hash".into(), UserRole::Moderator))
            .await
            .unwrap();

        let service = ModerationService::new(
            SqlxQuestionRepository::boxed(pool.clone()),
            SqlxModerationLogRepository::boxed(pool.clone()),
        );
        Fixture {
            _dir: dir,
            service,
            seed,
            moderator,
            pending,
        }
    }

    #[tokio::test]
    async fn test_pending_queue_oldest_first() {
        let f = setup().await;
        let page = f.service.list_pending(&ListParams::default()).await.unwrap();
        let ids: Vec<i64> = page.items.iter().map(|q| q.question.id).collect();
        assert_eq!(ids, f.pending);
        assert_eq!(page.items[0].uploader_email.as_deref(), Some("contrib@uni.edu"));
    }

    #[tokio::test]
    async fn test_approve_sets_reviewer_and_logs() {
        let f = setup().await;
        let id = f.pending[0];
        let approved = f.service.approve(&f.moderator, id).await.unwrap();
        assert_eq!(approved.question.status, QuestionStatus::Approved);
        assert_eq!(approved.question.reviewed_by, Some(f.moderator.id));
        assert!(approved.question.reviewed_at.is_some());
        assert!(approved.question.rejection_reason.is_none());

        let history = f.service.history(id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, ModerationAction::Approved);

        let queue = f.service.list_pending(&ListParams::default()).await.unwrap();
        assert_eq!(queue.total, 2);
    }

    #[tokio::test]
    async fn test_reject_with_reason_and_blank_reason() {
        let f = setup().await;
        let rejected = f
            .service
            .reject(&f.moderator, f.pending[0], Some("  Blurry scan "))
            .await
            .unwrap();
        assert_eq!(rejected.question.status, QuestionStatus::Rejected);
        assert_eq!(rejected.question.rejection_reason.as_deref(), Some("Blurry scan"));

        let rejected = f
            .service
            .reject(&f.moderator, f.pending[1], Some("   "))
            .await
            .unwrap();
        assert!(rejected.question.rejection_reason.is_none());
    }

    #[tokio::test]
    async fn test_review_only_once() {
        let f = setup().await;
        let id = f.pending[0];
        f.service.approve(&f.moderator, id).await.unwrap();

        assert!(matches!(
            f.service.reject(&f.moderator, id, None).await,
            Err(ModerationServiceError::AlreadyReviewed(QuestionStatus::Approved))
        ));
        assert!(matches!(
            f.service.approve(&f.moderator, id).await,
            Err(ModerationServiceError::AlreadyReviewed(_))
        ));
        assert!(matches!(
            f.service.approve(&f.moderator, 9999).await,
            Err(ModerationServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_simultaneous_reviews_log_one_decision() {
        let f = setup().await;
        let id = f.pending[0];

        let (approved, rejected) = tokio::join!(
            f.service.approve(&f.moderator, id),
            f.service.reject(&f.moderator, id, Some("Duplicate"))
        );
        assert_eq!(approved.is_ok() as u8 + rejected.is_ok() as u8, 1);
        let loser = if approved.is_ok() { rejected.err() } else { approved.err() };
        assert!(matches!(loser, Some(ModerationServiceError::AlreadyReviewed(_))));

        let history = f.service.history(id).await.unwrap();
        assert_eq!(history.len(), 1);
        let stored = f.service.questions.get_by_id(id).await.unwrap().unwrap();
        let expected = ModerationAction::for_review(stored.status);
        assert_eq!(Some(history[0].action), expected);
    }

    #[tokio::test]
    async fn test_flag_leaves_queue() {
        let f = setup().await;
        let flagged = f
            .service
            .flag(&f.moderator, f.pending[2], Some("Possible copyright issue"))
            .await
            .unwrap();
        assert_eq!(flagged.question.status, QuestionStatus::Flagged);
        let queue = f.service.list_pending(&ListParams::default()).await.unwrap();
        assert!(queue.items.iter().all(|q| q.question.id != f.pending[2]));
    }

    #[tokio::test]
    async fn test_students_cannot_moderate() {
        let f = setup().await;
        assert!(matches!(
            f.service.approve(&f.seed.contributor, f.pending[0]).await,
            Err(ModerationServiceError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_reason_too_long() {
        let f = setup().await;
        let reason = "x".repeat(MAX_REASON_LEN + 1);
        assert!(matches!(
            f.service.reject(&f.moderator, f.pending[0], Some(&reason)).await,
            Err(ModerationServiceError::ValidationError(_))
        ));
    }
}
