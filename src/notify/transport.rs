//! Outgoing mail delivery.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

/// One message for one or more recipients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &Mail) -> Result<()>;
}

/// Hands mail to an HTTP relay as a JSON document.
#[derive(Debug, Clone)]
pub struct HttpRelayTransport {
    http: reqwest::Client,
    relay_url: Url,
    token: Option<String>,
}

impl HttpRelayTransport {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(relay_url: Url, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            relay_url,
            token,
        })
    }
}

#[async_trait]
impl MailTransport for HttpRelayTransport {
    async fn send(&self, mail: &Mail) -> Result<()> {
        debug!(url = %self.relay_url, to = ?mail.to, "Posting mail to relay");

        let mut request = self.http.post(self.relay_url.clone()).json(mail);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context("Failed to reach mail relay")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            anyhow::bail!("Mail relay rejected message: {status} - {body}");
        }

        Ok(())
    }
}

/// Writes mail to the log instead of delivering it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, mail: &Mail) -> Result<()> {
        info!(
            from = %mail.from,
            to = ?mail.to,
            subject = %mail.subject,
            "Mail relay not configured, notice logged only"
        );
        Ok(())
    }
}
