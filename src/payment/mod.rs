pub mod stripe;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Gateway-side identifier of a completed charge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChargeId(pub String);

impl std::fmt::Display for ChargeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    /// Stored payment-method reference (gateway customer id).
    pub payment_method_token: String,
    pub amount_minor_units: i64,
    pub currency: String,
    pub description: String,
    /// Sent to the gateway so a replayed request cannot charge twice.
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRequest {
    pub email: String,
    pub name: String,
    /// One-time card source collected by the client (e.g. a checkout token).
    pub source: String,
}

/// Failure modes of a gateway call.
///
/// Only `Indeterminate` leaves the outcome unknown; the other two are
/// definitive "no money moved".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("charge declined: {0}")]
    Declined(String),

    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),

    #[error("payment outcome unknown: {0}")]
    Indeterminate(String),
}

impl GatewayError {
    /// Short label used in events and metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            GatewayError::Declined(_) => "declined",
            GatewayError::Unavailable(_) => "unavailable",
            GatewayError::Indeterminate(_) => "indeterminate",
        }
    }
}

/// Abstraction over payment processors.
/// Implementations: StripeClient (REST over reqwest).
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Register a card source and return a reusable payment-method token.
    async fn create_customer(&self, req: &CustomerRequest) -> Result<String, GatewayError>;

    /// Create a one-time charge against a stored payment method.
    async fn charge(&self, req: &ChargeRequest) -> Result<ChargeId, GatewayError>;

    /// Refund a charge in full.
    async fn refund(&self, charge: &ChargeId) -> Result<(), GatewayError>;
}
