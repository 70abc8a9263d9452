use anyhow::Context;
use serde::Serialize;

use super::{EventKind, EventNotifier, LicenseEvent};

/// Posts a short announcement to a Slack incoming webhook when a developer
/// signs up. Every other event kind is ignored.
#[derive(Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
    /// Sign-ups from this e-mail domain (staff accounts) are not announced.
    internal_domain: Option<String>,
}

#[derive(Serialize)]
struct SlackMessage {
    text: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>, internal_domain: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
            internal_domain,
        }
    }

    fn is_internal(&self, email: &str) -> bool {
        match self.internal_domain {
            Some(ref domain) => email.ends_with(&format!("@{}", domain)),
            None => false,
        }
    }

    /// The announcement text, or `None` when this event is not announced.
    fn signup_text(&self, event: &LicenseEvent) -> Option<String> {
        if event.kind != EventKind::DeveloperCreated {
            return None;
        }
        let dev = event.details.get("developer")?;
        let name = dev.get("name").and_then(|v| v.as_str()).unwrap_or_default();
        let email = dev.get("email").and_then(|v| v.as_str()).unwrap_or_default();
        if self.is_internal(email) {
            return None;
        }
        Some(format!("{} {} just signed up.", name, email))
    }

    pub async fn send(&self, text: String) -> anyhow::Result<()> {
        let url = match &self.webhook_url {
            Some(u) => u,
            None => {
                tracing::debug!("No Slack webhook URL configured, skipping notification");
                return Ok(());
            }
        };

        let resp = self
            .client
            .post(url)
            .json(&SlackMessage { text })
            .send()
            .await
            .context("failed to send slack notification")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("slack returned error: status={}, body={}", status, body);
        }

        tracing::info!("Sent Slack signup notification");
        Ok(())
    }
}

impl EventNotifier for SlackNotifier {
    fn emit(&self, event: LicenseEvent) {
        let Some(text) = self.signup_text(&event) else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let notifier = self.clone();
        handle.spawn(async move {
            if let Err(e) = notifier.send(text).await {
                tracing::warn!(error = %e, "slack signup notification failed");
            }
        });
    }
}
