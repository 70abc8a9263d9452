//! Stripe REST client.
//!
//! Talks to the three endpoints the licensing flow needs (`/v1/customers`,
//! `/v1/charges`, `/v1/refunds`) with form-encoded bodies, bearer auth and an
//! `Idempotency-Key` on charges. Requests are sent once and their outcome
//! classified; nothing in this client retries.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ChargeId, ChargeRequest, CustomerRequest, GatewayError, PaymentGateway};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

#[derive(Clone)]
pub struct StripeClient {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct ObjectId {
    id: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
    code: Option<String>,
}

impl StripeClient {
    pub fn new(api_base: &str, secret_key: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .user_agent("Broome/1.0")
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, String)],
        idempotency_key: Option<&str>,
    ) -> Result<String, GatewayError> {
        let url = format!("{}{}", self.api_base, path);
        let mut req = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(form);
        if let Some(key) = idempotency_key {
            req = req.header("Idempotency-Key", key);
        }

        let resp = req.send().await.map_err(classify_transport_error)?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            // The request reached Stripe; without the body we cannot tell what happened.
            GatewayError::Indeterminate(format!("failed to read response body: {}", e))
        })?;

        if status.is_success() {
            let obj: ObjectId = serde_json::from_str(&body).map_err(|e| {
                GatewayError::Indeterminate(format!("unparseable success response: {}", e))
            })?;
            return Ok(obj.id);
        }

        let envelope = serde_json::from_str::<ErrorEnvelope>(&body).ok();
        let idempotency_error = envelope
            .as_ref()
            .and_then(|env| env.error.kind.as_deref())
            == Some("idempotency_error");
        let message = envelope
            .map(|env| match (env.error.code, env.error.message) {
                (Some(code), Some(msg)) => format!("{}: {}", code, msg),
                (None, Some(msg)) => msg,
                (Some(code), None) => code,
                (None, None) => status.to_string(),
            })
            .unwrap_or_else(|| status.to_string());

        tracing::warn!(path, status = %status, error = %message, "stripe request failed");

        Err(match status.as_u16() {
            429 => GatewayError::Unavailable(message),
            // idempotency-key reuse with a request still in flight
            409 => GatewayError::Indeterminate(message),
            // the key was already spent on a request with other parameters,
            // which may have charged
            400 if idempotency_error => GatewayError::Indeterminate(message),
            400..=499 => GatewayError::Declined(message),
            _ => GatewayError::Indeterminate(message),
        })
    }
}

fn classify_transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_connect() {
        // Never reached Stripe, nothing can have been charged.
        GatewayError::Unavailable(e.to_string())
    } else if e.is_timeout() {
        GatewayError::Indeterminate(format!("timed out waiting for gateway: {}", e))
    } else {
        GatewayError::Indeterminate(e.to_string())
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    #[tracing::instrument(skip(self, req), fields(email = %req.email))]
    async fn create_customer(&self, req: &CustomerRequest) -> Result<String, GatewayError> {
        let form = [
            ("email", req.email.clone()),
            ("description", req.name.clone()),
            ("source", req.source.clone()),
        ];
        self.post_form("/v1/customers", &form, None).await
    }

    #[tracing::instrument(skip(self, req), fields(amount = req.amount_minor_units, currency = %req.currency))]
    async fn charge(&self, req: &ChargeRequest) -> Result<ChargeId, GatewayError> {
        let form = [
            ("amount", req.amount_minor_units.to_string()),
            ("currency", req.currency.clone()),
            ("customer", req.payment_method_token.clone()),
            ("description", req.description.clone()),
        ];
        let id = self
            .post_form("/v1/charges", &form, req.idempotency_key.as_deref())
            .await?;
        tracing::info!(charge_id = %id, "charge created");
        Ok(ChargeId(id))
    }

    #[tracing::instrument(skip(self))]
    async fn refund(&self, charge: &ChargeId) -> Result<(), GatewayError> {
        let form = [("charge", charge.0.clone())];
        let key = format!("refund-{}", charge.0);
        self.post_form("/v1/refunds", &form, Some(&key)).await?;
        tracing::info!(charge_id = %charge, "charge refunded");
        Ok(())
    }
}
