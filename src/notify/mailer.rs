use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::MailgunConfig;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail provider not configured: {0}")]
    NotConfigured(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

/// Sends through the Mailgun messages API.
pub struct MailgunMailer {
    config: MailgunConfig,
    client: reqwest::Client,
}

impl MailgunMailer {
    pub fn new(config: MailgunConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Mailer for MailgunMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .ok_or(MailError::NotConfigured("MAILGUN_API_KEY"))?;
        let domain = self
            .config
            .domain
            .as_deref()
            .ok_or(MailError::NotConfigured("MAILGUN_DOMAIN"))?;

        let url = format!(
            "{}/v3/{}/messages",
            self.config.api_url.trim_end_matches('/'),
            domain
        );
        let from = format!("Spilll <noreply@{}>", domain);
        debug!(to = %email.to, subject = %email.subject, "sending mail");

        let response = self
            .client
            .post(&url)
            .basic_auth("api", Some(key))
            .form(&[
                ("from", from.as_str()),
                ("to", email.to.as_str()),
                ("subject", email.subject.as_str()),
                ("html", email.html.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::DeliveryFailed(format!(
                "Mailgun returned {}: {}",
                status, body
            )));
        }

        info!(to = %email.to, subject = %email.subject, "mail sent");
        Ok(())
    }
}
