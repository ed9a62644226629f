use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{NotifierConfig, NotifierKind};

/// Messaging transport. Every failure is treated alike by the caller.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<()>;
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
}

/// Posts `{"text": …}` to an HTTP endpoint
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { client, url: url.into(), token })
    }

    /// Build from config, reading the credential from the variable named by
    /// `token_env`
    pub fn from_config(config: &NotifierConfig) -> Result<Self> {
        let url = config.url.clone().ok_or_else(|| anyhow!("Webhook notifier requires a url"))?;

        let token = match config.token_env.as_deref() {
            Some(var) => match std::env::var(var) {
                Ok(token) if !token.trim().is_empty() => Some(token),
                _ => {
                    warn!("Credential variable {} is not set, sending without a token", var);
                    None
                }
            },
            None => None,
        };

        Self::new(url, token, Duration::from_millis(config.send_timeout_ms))
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        let mut request = self.client.post(&self.url).json(&WebhookPayload { text: message });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| anyhow!("Webhook request failed: {}", e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(anyhow!("Webhook rejected message with status code: {}", status.as_u16()))
        }
    }
}

/// Writes messages to the log instead of sending them
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        info!(target: "netwatch::notify", "{}", message);
        Ok(())
    }
}

pub fn build_notifier(config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
    Ok(match config.kind {
        NotifierKind::Webhook => Arc::new(WebhookNotifier::from_config(config)?),
        NotifierKind::Log => Arc::new(LogNotifier),
    })
}
