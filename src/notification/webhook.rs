use anyhow::Result;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{EventNotifier, LicenseEvent};

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`.
/// Returns lowercase hex digest (e.g. "sha256=<hex>").
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Delivers license events to the configured webhook URLs
/// (analytics collectors, billing alerts, ...).
/// Supports:
/// - HMAC-SHA256 signing (X-Broome-Signature header)
/// - Up to 3 retries with exponential back-off (1s, 5s, then 25s)
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Vec<String>,
    signing_secret: Option<String>,
    backoff_secs: Vec<u64>,
}

impl WebhookNotifier {
    pub fn new(urls: Vec<String>, signing_secret: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Broome-Webhook/1.0")
            .build()?;
        Ok(Self {
            client,
            urls,
            signing_secret,
            backoff_secs: vec![0, 1, 5, 25],
        })
    }

    /// Override the retry schedule (first entry is the initial attempt's delay).
    pub fn with_backoff(mut self, backoff_secs: Vec<u64>) -> Self {
        self.backoff_secs = backoff_secs;
        self
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Send a signed event to a single URL with retry.
    /// Returns `Ok(())` if delivery succeeded on any attempt.
    pub async fn send(&self, url: &str, event: &LicenseEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| anyhow::anyhow!("webhook serialize error: {}", e))?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self
            .signing_secret
            .as_deref()
            .map(|s| hmac_sha256_hex(s, &payload));
        let event_type = event.kind.as_str();

        for (attempt, &delay) in self.backoff_secs.iter().enumerate() {
            if delay > 0 {
                debug!(url, attempt, delay_secs = delay, event_type, "retrying webhook delivery");
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-broome-delivery-id", &delivery_id)
                .header("x-broome-timestamp", &timestamp)
                .header("x-broome-event", event_type);

            if let Some(ref sig) = signature {
                req = req.header("x-broome-signature", sig.as_str());
            }

            match req.body(payload.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %resp.status(),
                        "webhook delivered successfully"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(
                        url,
                        event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %status,
                        body = %body,
                        "webhook delivery failed (non-2xx), will retry"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "webhook request error, will retry"
                    );
                }
            }
        }

        warn!(url, event_type, delivery_id = %delivery_id, "webhook delivery failed after all retries");
        Err(anyhow::anyhow!(
            "webhook delivery failed after {} attempts: {}",
            self.backoff_secs.len(),
            url
        ))
    }
}

impl EventNotifier for WebhookNotifier {
    /// Dispatch to all configured URLs on a background task.
    /// Each URL is attempted independently; failures are logged, never returned.
    fn emit(&self, event: LicenseEvent) {
        if self.urls.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(event_type = event.kind.as_str(), "no async runtime, dropping webhook event");
            return;
        };

        let notifier = self.clone();
        handle.spawn(async move {
            for url in &notifier.urls {
                if let Err(e) = notifier.send(url, &event).await {
                    warn!(url, error = %e, "webhook dispatch ultimately failed");
                }
            }
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────
