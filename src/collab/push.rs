//! Webhook push notifier.
//!
//! Thin HTTP wrapper: one POST per chat message to a configured webhook, so
//! an external service can notify offline members. Fire-and-forget — the
//! relay never waits on it and a failed delivery is only logged.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::PushNotifier;

const REQUEST_TIMEOUT_SECS: u64 = 10;
const CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum PushConfigError {
    #[error("PUSH_WEBHOOK_URL not set")]
    MissingUrl,
    #[error("failed to build HTTP client: {0}")]
    HttpClientBuild(String),
}

pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Build the notifier from `PUSH_WEBHOOK_URL`.
    ///
    /// # Errors
    ///
    /// Returns an error if the env var is unset or the client cannot be
    /// built; the caller treats either as "push disabled".
    pub fn from_env() -> Result<Self, PushConfigError> {
        let url = std::env::var("PUSH_WEBHOOK_URL").map_err(|_| PushConfigError::MissingUrl)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| PushConfigError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl PushNotifier for WebhookNotifier {
    async fn notify(&self, group_id: &str, sender_name: &str, text: &str) {
        let body = serde_json::json!({
            "group_id": group_id,
            "sender": sender_name,
            "text": text,
        });
        match self.http.post(&self.url).json(&body).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), %group_id, "push webhook rejected notification");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, %group_id, "push webhook unreachable");
            }
        }
    }
}
