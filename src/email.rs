use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

#[async_trait]
pub trait EmailClient: Send + Sync {
    async fn send_email(&self, message: &EmailMessage) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PostmarkRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html_body: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PostmarkResponse {
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    message: String,
    #[serde(rename = "MessageID", default)]
    message_id: Option<String>,
}

/// Sends through Postmark's `/email` endpoint.
#[derive(Clone)]
pub struct PostmarkEmailClient {
    client: Client,
    api_url: String,
    server_token: String,
    default_from: String,
}

impl PostmarkEmailClient {
    pub fn new(api_url: &str, server_token: &str, default_from: &str) -> anyhow::Result<Self> {
        let client = ClientBuilder::new()
            .user_agent(concat!("keyhole/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(15))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            server_token: server_token.to_string(),
            default_from: default_from.to_string(),
        })
    }
}

#[async_trait]
impl EmailClient for PostmarkEmailClient {
    async fn send_email(&self, message: &EmailMessage) -> anyhow::Result<()> {
        let body = PostmarkRequest {
            from: &self.default_from,
            to: &message.to,
            subject: &message.subject,
            html_body: &message.html_body,
        };
        let res = self
            .client
            .post(format!("{}/email", self.api_url))
            .header("Accept", "application/json")
            .header("X-Postmark-Server-Token", &self.server_token)
            .json(&body)
            .send()
            .await
            .context("postmark request")?;

        let status = res.status();
        let text = res.text().await.context("read postmark response")?;
        anyhow::ensure!(status.is_success(), "postmark HTTP {status}: {text}");

        let parsed: PostmarkResponse =
            serde_json::from_str(&text).context("decode postmark response")?;
        anyhow::ensure!(
            parsed.error_code == 0,
            "postmark error {}: {}",
            parsed.error_code,
            parsed.message
        );
        debug!(message_id = ?parsed.message_id, subject = %message.subject, "email sent");
        Ok(())
    }
}

/// Development fallback when no Postmark token is configured.
#[derive(Clone, Default)]
pub struct LogEmailClient;

#[async_trait]
impl EmailClient for LogEmailClient {
    async fn send_email(&self, message: &EmailMessage) -> anyhow::Result<()> {
        // The body carries a live reset link; it stays out of the logs.
        info!(
            to = %message.to,
            subject = %message.subject,
            "email not sent (no provider configured)"
        );
        Ok(())
    }
}

pub fn reset_password_email(to: &str, reset_url: &str) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: "Password reset".into(),
        html_body: format!(
            "<p>A password reset was requested for your account.</p>\
             <p><a href=\"{reset_url}\">Reset your password</a></p>\
             <p>If you did not request it, you can ignore this email.</p>"
        ),
    }
}
