//! Outgoing mail
//!
//! Password reset links and user feedback go out over SMTP through lettre.
//! Services depend on the [`Mailer`] trait so the transport can be swapped
//! for a recorder in tests.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;

use crate::config::EmailConfig;

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("Email service not configured.")]
    NotConfigured,

    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("Failed to send email: {0}")]
    SendFailed(String),
}

/// A plain-text message ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub reply_to: Option<String>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    fn is_configured(&self) -> bool;

    /// Address that receives user feedback, if any
    fn feedback_address(&self) -> Option<String>;

    async fn send(&self, mail: OutgoingMail) -> Result<(), EmailError>;
}

pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    pub fn boxed(config: EmailConfig) -> Arc<dyn Mailer> {
        Arc::new(Self::new(config))
    }

    fn build_message(&self, mail: &OutgoingMail) -> Result<Message, EmailError> {
        let from = self
            .config
            .from_address
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(EmailError::NotConfigured)?;

        let mut builder = Message::builder()
            .from(parse_mailbox(from)?)
            .to(parse_mailbox(&mail.to)?)
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_PLAIN);

        if let Some(reply_to) = &mail.reply_to {
            builder = builder.reply_to(parse_mailbox(reply_to)?);
        }

        builder
            .body(mail.body.clone())
            .map_err(|e| EmailError::SendFailed(e.to_string()))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, EmailError> {
        let host = self
            .config
            .smtp_host
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(EmailError::NotConfigured)?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| EmailError::SendFailed(format!("SMTP transport: {}", e)))?
            .port(self.config.smtp_port);

        if let (Some(user), Some(pass)) = (&self.config.smtp_username, &self.config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(builder.build())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, EmailError> {
    address
        .trim()
        .parse()
        .map_err(|_| EmailError::InvalidAddress(address.to_string()))
}

#[async_trait]
impl Mailer for SmtpMailer {
    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    fn feedback_address(&self) -> Option<String> {
        self.config
            .feedback_to
            .clone()
            .or_else(|| self.config.from_address.clone())
            .filter(|s| !s.trim().is_empty())
    }

    async fn send(&self, mail: OutgoingMail) -> Result<(), EmailError> {
        if !self.is_configured() {
            return Err(EmailError::NotConfigured);
        }
        let message = self.build_message(&mail)?;
        self.transport()?
            .send(message)
            .await
            .map_err(|e| EmailError::SendFailed(e.to_string()))?;

        tracing::info!("Sent email \"{}\" to {}", mail.subject, mail.to);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> EmailConfig {
        EmailConfig {
            smtp_host: Some("smtp.archive.test".into()),
            from_address: Some("noreply@archive.test".into()),
            ..EmailConfig::default()
        }
    }

    fn mail() -> OutgoingMail {
        OutgoingMail {
            to: "student@uni.edu".into(),
            subject: "Hello".into(),
            body: "Body".into(),
            reply_to: Some("sender@uni.edu".into()),
        }
    }

    #[tokio::test]
    async fn test_unconfigured_mailer_refuses() {
        let mailer = SmtpMailer::new(EmailConfig::default());
        assert!(!mailer.is_configured());
        let err = mailer.send(mail()).await.unwrap_err();
        assert!(matches!(err, EmailError::NotConfigured));
        assert_eq!(err.to_string(), "Email service not configured.");
    }

    #[test]
    fn test_build_message_with_reply_to() {
        let mailer = SmtpMailer::new(configured());
        let message = mailer.build_message(&mail()).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Reply-To: sender@uni.edu"));
        assert!(raw.contains("Subject: Hello"));
    }

    #[test]
    fn test_build_message_rejects_bad_address() {
        let mailer = SmtpMailer::new(configured());
        let mut bad = mail();
        bad.to = "not an address".into();
        assert!(matches!(
            mailer.build_message(&bad),
            Err(EmailError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_feedback_address_falls_back_to_from() {
        let mailer = SmtpMailer::new(configured());
        assert_eq!(mailer.feedback_address().as_deref(), Some("noreply@archive.test"));

        let mut config = configured();
        config.feedback_to = Some("team@archive.test".into());
        let mailer = SmtpMailer::new(config);
        assert_eq!(mailer.feedback_address().as_deref(), Some("team@archive.test"));
    }
}
