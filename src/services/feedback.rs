//! Feedback service
//!
//! Bug reports and suggestions from the contact form, mailed to the
//! archive team with reply-to set to the sender.

use crate::services::email::{EmailError, Mailer, OutgoingMail};
use crate::services::user::{is_valid_email, normalize_email};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const MAX_MESSAGE_LEN: usize = 5000;

#[derive(Debug, thiserror::Error)]
pub enum FeedbackServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    Email(#[from] EmailError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Bug,
    Improvement,
    Other,
}

impl fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeedbackKind::Bug => "bug",
            FeedbackKind::Improvement => "improvement",
            FeedbackKind::Other => "other",
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackInput {
    pub name: String,
    pub email: String,
    #[serde(rename = "type")]
    pub kind: FeedbackKind,
    pub subject: String,
    pub message: String,
}

pub struct FeedbackService {
    mailer: Arc<dyn Mailer>,
}

impl FeedbackService {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    pub async fn submit(&self, input: &FeedbackInput) -> Result<(), FeedbackServiceError> {
        let mail = self.compose(input)?;
        self.mailer.send(mail).await?;
        tracing::info!("Feedback ({}) sent from {}", input.kind, normalize_email(&input.email));
        Ok(())
    }

    fn compose(&self, input: &FeedbackInput) -> Result<OutgoingMail, FeedbackServiceError> {
        let name = required(&input.name, "Name")?;
        let subject = required(&input.subject, "Subject")?;
        let message = required(&input.message, "Message")?;
        let email = normalize_email(&input.email);
        if !is_valid_email(&email) {
            return Err(FeedbackServiceError::ValidationError(
                "Invalid email address".into(),
            ));
        }
        if message.chars().count() > MAX_MESSAGE_LEN {
            return Err(FeedbackServiceError::ValidationError(format!(
                "Message must be at most {} characters",
                MAX_MESSAGE_LEN
            )));
        }

        if !self.mailer.is_configured() {
            return Err(EmailError::NotConfigured.into());
        }
        let to = self
            .mailer
            .feedback_address()
            .ok_or(EmailError::NotConfigured)?;

        Ok(OutgoingMail {
            to,
            subject: format!("[{}] {}", input.kind.to_string().to_uppercase(), subject),
            body: format!(
                "From: {} <{}>\nType: {}\n\n{}",
                name, email, input.kind, message
            ),
            reply_to: Some(email),
        })
    }
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str, FeedbackServiceError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(FeedbackServiceError::ValidationError(format!(
            "{} is required",
            field
        )));
    }
    Ok(value)
}
