//! Push dispatch: hands schedule messages to the delivery service.
//! Supports: HTTP webhook (JSON POST) and a log-only sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::config::PushConfig;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::{PushDispatcher, PushMessage};

/// POSTs each message as JSON to a delivery endpoint.
pub struct WebhookDispatcher {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl PushDispatcher for WebhookDispatcher {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, message: &PushMessage) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(message)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CadenceError::Dispatch(format!("Webhook send failed: {e}")))?;

        if resp.status().is_success() {
            tracing::info!("✅ Push sent for applet {}: {}", message.applet_id, message.title);
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(CadenceError::Dispatch(format!("Webhook error {status}: {body}")))
        }
    }
}

/// Records messages in the log only. Used when no webhook is configured.
#[derive(Default)]
pub struct LogDispatcher;

#[async_trait]
impl PushDispatcher for LogDispatcher {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, message: &PushMessage) -> Result<()> {
        let audience = match &message.respondent_ids {
            Some(ids) => format!("{} respondent(s)", ids.len()),
            None => "all respondents".to_string(),
        };
        tracing::info!(
            "📨 [{:?}] applet {} → {}: {}",
            message.kind,
            message.applet_id,
            audience,
            message.body
        );
        Ok(())
    }
}

/// Pick the dispatcher the push config asks for.
pub fn dispatcher_from_config(config: &PushConfig) -> Arc<dyn PushDispatcher> {
    if config.webhook_url.trim().is_empty() {
        Arc::new(LogDispatcher)
    } else {
        Arc::new(WebhookDispatcher::new(
            config.webhook_url.trim(),
            Duration::from_secs(config.timeout_secs),
        ))
    }
}
