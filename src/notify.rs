//! Optional webhook notifications for detected opportunities.
//!
//! Notification failures are logged and swallowed: the analysis pass has
//! already persisted its results and a dead webhook must not affect it.

use crate::models::ArbitrageOpportunity;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WebhookNotifier {
    client: Client,
    url: Option<String>,
}

impl WebhookNotifier {
    /// `url == None` disables notifications entirely.
    pub fn new(client: Client, url: Option<String>) -> Self {
        Self { client, url }
    }

    pub async fn notify(&self, opportunities: &[ArbitrageOpportunity]) {
        let Some(url) = &self.url else {
            return;
        };
        if opportunities.is_empty() {
            return;
        }

        let result = self
            .client
            .post(url)
            .timeout(NOTIFY_TIMEOUT)
            .json(&serde_json::json!({ "opportunities": opportunities }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!(count = opportunities.len(), "🔔 webhook notified");
            }
            Ok(response) => {
                warn!(status = %response.status(), "webhook rejected notification");
            }
            Err(e) => {
                warn!(error = %e, "webhook unreachable");
            }
        }
    }
}
