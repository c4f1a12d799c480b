//! Outbound mail delivery.
//!
//! Password recovery is the only flow that sends mail. Delivery goes through
//! the `MailSender` trait so the relay can be swapped without touching
//! handlers. `LogMailSender` is the local default and only logs the message;
//! `HttpMailSender` posts the message as JSON to a relay endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{Instrument, info, info_span};
use url::Url;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
}

impl MailMessage {
    /// Password reset mail carrying the one-time code.
    #[must_use]
    pub fn password_reset(from: &str, to: &str, otp: &str, ttl_seconds: i64) -> Self {
        let minutes = (ttl_seconds / 60).max(1);
        Self {
            from: from.to_string(),
            to: to.to_string(),
            subject: "EduResolve password reset".to_string(),
            text: format!(
                "Your OTP for resetting your EduResolve password is {otp}. It is valid for {minutes} minutes."
            ),
        }
    }
}

#[async_trait]
pub trait MailSender: Send + Sync {
    /// Deliver a message or return an error so the caller can report it.
    async fn send(&self, message: &MailMessage) -> Result<()>;
}

/// Local dev sender that logs the message instead of delivering it.
#[derive(Clone, Debug)]
pub struct LogMailSender;

#[async_trait]
impl MailSender for LogMailSender {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            "mail send stub"
        );
        Ok(())
    }
}

/// Posts each message as JSON to a mail relay.
#[derive(Clone, Debug)]
pub struct HttpMailSender {
    client: Client,
    relay_url: Url,
}

impl HttpMailSender {
    /// # Errors
    /// Returns an error if the relay URL is invalid or the HTTP client cannot be built.
    pub fn new(relay_url: &str) -> Result<Self> {
        let relay_url =
            Url::parse(relay_url).with_context(|| format!("Invalid mail relay URL: {relay_url}"))?;
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build mail relay client")?;
        Ok(Self { client, relay_url })
    }
}

#[async_trait]
impl MailSender for HttpMailSender {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        let span = info_span!(
            "mail.send",
            http.method = "POST",
            http.url = %self.relay_url
        );
        self.client
            .post(self.relay_url.clone())
            .json(message)
            .send()
            .instrument(span)
            .await
            .context("failed to reach mail relay")?
            .error_for_status()
            .context("mail relay rejected message")?;
        Ok(())
    }
}

/// Keeps every message in memory; used by local runs and the integration tests.
#[derive(Debug, Default)]
pub struct RecordingMailSender {
    sent: Mutex<Vec<MailMessage>>,
}

impl RecordingMailSender {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl MailSender for RecordingMailSender {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_reset_mail_mentions_code_and_validity() {
        let message = MailMessage::password_reset("from@x.dev", "to@x.dev", "012345", 180);
        assert!(message.text.contains("012345"));
        assert!(message.text.contains("3 minutes"));
        assert_eq!(message.to, "to@x.dev");
    }

    #[test]
    fn http_sender_rejects_invalid_url() {
        assert!(HttpMailSender::new("not a url").is_err());
    }

    #[tokio::test]
    async fn recording_sender_keeps_messages() -> Result<()> {
        let sender = RecordingMailSender::new();
        let message = MailMessage::password_reset("a@x.dev", "b@x.dev", "111111", 60);
        sender.send(&message).await?;
        assert_eq!(sender.sent().await, vec![message]);
        Ok(())
    }
}
