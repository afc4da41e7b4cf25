//! Question model
//!
//! A question is one uploaded exam paper image together with its taxonomy
//! classification and moderation state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: i64,
    /// Public URL of the stored image
    pub image_url: String,
    /// Key of the image inside the object store
    #[serde(skip_serializing, default)]
    pub storage_key: String,
    pub thumbnail_url: Option<String>,
    pub exam_year: i32,
    pub session: Option<ExamSession>,
    pub department_id: i64,
    pub exam_name_id: i64,
    pub course_id: i64,
    /// Copy of the course code at upload time
    pub course_code: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub status: QuestionStatus,
    pub rejection_reason: Option<String>,
    pub created_by: i64,
    pub reviewed_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl Question {
    /// Extension of the stored object, `jpg` when the key has none
    pub fn file_extension(&self) -> &str {
        std::path::Path::new(&self.storage_key)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("jpg")
    }
}

/// Question joined with the display names of its references
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionWithMeta {
    #[serde(flatten)]
    pub question: Question,
    pub department_name: Option<String>,
    pub exam_name: Option<String>,
    pub course_title: Option<String>,
    pub uploader_email: Option<String>,
}

/// Moderation state of a question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Flagged,
}

impl QuestionStatus {
    pub const ALL: [QuestionStatus; 4] = [
        QuestionStatus::Pending,
        QuestionStatus::Approved,
        QuestionStatus::Rejected,
        QuestionStatus::Flagged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionStatus::Pending => "pending",
            QuestionStatus::Approved => "approved",
            QuestionStatus::Rejected => "rejected",
            QuestionStatus::Flagged => "flagged",
        }
    }
}

impl fmt::Display for QuestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(QuestionStatus::Pending),
            "approved" => Ok(QuestionStatus::Approved),
            "rejected" => Ok(QuestionStatus::Rejected),
            "flagged" => Ok(QuestionStatus::Flagged),
            _ => Err(anyhow::anyhow!("Invalid question status: {}", s)),
        }
    }
}

/// Academic session the exam was held in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExamSession {
    Spring,
    Summer,
    Fall,
    Winter,
}

impl ExamSession {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExamSession::Spring => "Spring",
            ExamSession::Summer => "Summer",
            ExamSession::Fall => "Fall",
            ExamSession::Winter => "Winter",
        }
    }
}

impl fmt::Display for ExamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExamSession {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "spring" => Ok(ExamSession::Spring),
            "summer" => Ok(ExamSession::Summer),
            "fall" | "autumn" => Ok(ExamSession::Fall),
            "winter" => Ok(ExamSession::Winter),
            _ => Err(anyhow::anyhow!("Invalid exam session: {}", s)),
        }
    }
}

/// Validated row for insertion; the question starts out pending
#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub image_url: String,
    pub storage_key: String,
    pub exam_year: i32,
    pub session: Option<ExamSession>,
    pub department_id: i64,
    pub exam_name_id: i64,
    pub course_id: i64,
    pub course_code: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub created_by: i64,
}

/// Optional constraints for listing questions. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuestionFilter {
    pub status: Option<QuestionStatus>,
    pub department_id: Option<i64>,
    pub course_id: Option<i64>,
    pub exam_name_id: Option<i64>,
    pub year: Option<i32>,
    pub session: Option<ExamSession>,
    /// Case-insensitive substring of description or course code
    pub search: Option<String>,
    pub created_by: Option<i64>,
}

impl QuestionFilter {
    /// Filter restricted to the public archive
    pub fn approved() -> Self {
        Self {
            status: Some(QuestionStatus::Approved),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        for status in QuestionStatus::ALL {
            assert_eq!(status.as_str().parse::<QuestionStatus>().unwrap(), status);
        }
        assert!("published".parse::<QuestionStatus>().is_err());
    }

    #[test]
    fn test_session_parse_is_case_insensitive() {
        assert_eq!("FALL".parse::<ExamSession>().unwrap(), ExamSession::Fall);
        assert_eq!("autumn".parse::<ExamSession>().unwrap(), ExamSession::Fall);
        assert_eq!(
            serde_json::to_string(&ExamSession::Spring).unwrap(),
            "\"Spring\""
        );
        assert!("monsoon".parse::<ExamSession>().is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&QuestionStatus::Flagged).unwrap(),
            "\"flagged\""
        );
    }
}
