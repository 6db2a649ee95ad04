//! Outbound email for alert notifications.
//!
//! Delivery goes through an HTTP mail relay when one is configured, and is
//! only logged otherwise.

mod http;

pub use http::*;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use thiserror::Error;

/// Mail error types.
#[derive(Error, Debug)]
pub enum MailError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("relay rejected message: {0}")]
    Rejected(String),
}

/// A templated email ready for the relay.
#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub template: String,
    pub template_data: serde_json::Value,
}

/// Something that can deliver an `EmailMessage`.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;
}

/// Sender used when no relay is configured.
pub struct LogMailer;

#[async_trait]
impl EmailSender for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            "Mail relay not configured, email not sent"
        );
        Ok(())
    }
}

/// Loose syntactic check; the relay does the real validation.
pub fn is_valid_email(address: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());
    re.is_match(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_email() {
        assert!(is_valid_email("ops@groundstation.org"));
        assert!(is_valid_email("a.b+alerts@sub.example.co"));
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("two@@example.com"));
        assert!(!is_valid_email("spaces in@example.com"));
        assert!(!is_valid_email("user@localhost"));
    }

    #[tokio::test]
    async fn test_log_mailer_accepts_everything() {
        let msg = EmailMessage {
            to: "ops@example.com".to_string(),
            subject: "hi".to_string(),
            template: "station_alert".to_string(),
            template_data: serde_json::json!({}),
        };
        assert!(LogMailer.send(&msg).await.is_ok());
    }
}
