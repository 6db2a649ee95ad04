//! HTTP mail relay client.

use super::{EmailMessage, EmailSender, MailError};

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Posts each message as JSON to a mail relay endpoint.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    from: String,
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    #[serde(flatten)]
    message: &'a EmailMessage,
}

impl HttpMailer {
    pub fn new(endpoint: &str, from: &str, timeout: Duration) -> Result<Self, MailError> {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(MailError::Config(format!(
                "mail endpoint must be an http(s) URL: {}",
                endpoint
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MailError::Config(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl EmailSender for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RelayRequest {
                from: &self.from,
                message,
            })
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected(format!("{}: {}", status, body)));
        }

        tracing::debug!(to = %message.to, "Email handed to relay");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_endpoint() {
        let result = HttpMailer::new("smtp://mail.local", "a@b.c", Duration::from_secs(1));
        assert!(matches!(result, Err(MailError::Config(_))));
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_transport_error() {
        let timeout = Duration::from_millis(100);
        let mailer = HttpMailer::new("http://256.256.256.256/send", "a@b.c", timeout).unwrap();
        let msg = EmailMessage {
            to: "ops@example.com".to_string(),
            subject: "down".to_string(),
            template: "station_alert".to_string(),
            template_data: serde_json::json!({ "station_name": "gs-1" }),
        };
        assert!(matches!(mailer.send(&msg).await, Err(MailError::Transport(_))));
    }
}
