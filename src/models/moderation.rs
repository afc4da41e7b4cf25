//! Moderation log model

use super::QuestionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One entry of the append-only moderation audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationLogEntry {
    pub id: i64,
    /// `None` once the question has been deleted
    pub question_id: Option<i64>,
    pub moderator_id: i64,
    pub action: ModerationAction,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    Approved,
    Rejected,
    Flagged,
    Deleted,
}

impl ModerationAction {
    /// Action recorded when a review moves a question to `status`
    pub fn for_review(status: QuestionStatus) -> Option<Self> {
        match status {
            QuestionStatus::Approved => Some(ModerationAction::Approved),
            QuestionStatus::Rejected => Some(ModerationAction::Rejected),
            QuestionStatus::Flagged => Some(ModerationAction::Flagged),
            QuestionStatus::Pending => None,
        }
    }
}

impl fmt::Display for ModerationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModerationAction::Approved => "approved",
            ModerationAction::Rejected => "rejected",
            ModerationAction::Flagged => "flagged",
            ModerationAction::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

impl FromStr for ModerationAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(ModerationAction::Approved),
            "rejected" => Ok(ModerationAction::Rejected),
            "flagged" => Ok(ModerationAction::Flagged),
            "deleted" => Ok(ModerationAction::Deleted),
            _ => Err(anyhow::anyhow!("Invalid moderation action: {}", s)),
        }
    }
}
