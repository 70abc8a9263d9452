//! Session check and automatic renewal.
//!
//! A session check reads the developer, classifies the license and, when it
//! has lapsed with a payment method on file, charges once and extends the
//! expiration. The whole read-evaluate-charge-update sequence runs under the
//! developer's lock, and the final write is a compare-and-swap on the
//! expiration that was read, so no two checks can both charge for the same
//! lapsed period.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use super::locks::DeveloperLocks;
use super::{evaluate, period_end, LicenseState};
use crate::config::BillingPolicy;
use crate::models::developer::{Developer, DeveloperUpdate};
use crate::notification::{EventNotifier, LicenseEvent};
use crate::payment::{ChargeId, ChargeRequest, GatewayError, PaymentGateway};
use crate::store::{DeveloperStore, StoreError, SwapOutcome};

/// Successful outcomes of a session check.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionResult {
    /// License valid, nothing changed.
    Active(Developer),
    /// Lapsed, no payment method. Nothing changed.
    Expired(Developer),
    /// Lapsed, charged, and the new expiration is persisted.
    Renewed(Developer),
    /// Lapsed with a payment method but the charge did not succeed.
    /// The stored record is untouched.
    RenewalFailed {
        developer: Developer,
        reason: RenewalFailure,
    },
}

impl SessionResult {
    pub fn developer(&self) -> &Developer {
        match self {
            SessionResult::Active(d)
            | SessionResult::Expired(d)
            | SessionResult::Renewed(d)
            | SessionResult::RenewalFailed { developer: d, .. } => d,
        }
    }

    /// Wire discriminator: `found`, `expired` or `failed`.
    pub fn status(&self) -> &'static str {
        match self {
            SessionResult::Active(_) | SessionResult::Renewed(_) => "found",
            SessionResult::Expired(_) => "expired",
            SessionResult::RenewalFailed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenewalFailure {
    /// Gateway refused the charge. No money moved.
    Declined(String),
    /// Gateway unreachable or rate limited. No money moved.
    Unavailable(String),
    /// Timeout or ambiguous gateway response. The charge may have gone
    /// through; reconcile against the gateway before retrying by hand.
    Indeterminate(String),
    /// Another writer moved the expiration while the charge was in flight.
    /// Our charge was refunded and the license is still lapsed.
    Superseded,
}

impl RenewalFailure {
    pub fn message(&self) -> String {
        match self {
            RenewalFailure::Declined(m) => format!("charge declined: {}", m),
            RenewalFailure::Unavailable(m) => format!("payment gateway unavailable: {}", m),
            RenewalFailure::Indeterminate(m) => format!("payment outcome unknown: {}", m),
            RenewalFailure::Superseded => "license changed during renewal".to_string(),
        }
    }
}

impl From<GatewayError> for RenewalFailure {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Declined(m) => RenewalFailure::Declined(m),
            GatewayError::Unavailable(m) => RenewalFailure::Unavailable(m),
            GatewayError::Indeterminate(m) => RenewalFailure::Indeterminate(m),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("developer {0} not found")]
    NotFound(String),

    #[error("developer {developer_id} has no expiration set")]
    InvalidInput { developer_id: Uuid },

    /// `charge_id` is set when money moved but the new expiration was not
    /// persisted. The record needs manual repair.
    #[error("store error: {source}")]
    Store {
        #[source]
        source: StoreError,
        charge_id: Option<ChargeId>,
    },
}

impl From<StoreError> for SessionError {
    fn from(source: StoreError) -> Self {
        SessionError::Store {
            source,
            charge_id: None,
        }
    }
}

pub struct RenewalOrchestrator {
    store: Arc<dyn DeveloperStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn EventNotifier>,
    policy: BillingPolicy,
    locks: DeveloperLocks,
}

impl RenewalOrchestrator {
    pub fn new(
        store: Arc<dyn DeveloperStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn EventNotifier>,
        policy: BillingPolicy,
        locks: DeveloperLocks,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            policy,
            locks,
        }
    }

    pub fn policy(&self) -> &BillingPolicy {
        &self.policy
    }

    /// Check a developer's session, renewing it if it has lapsed and a
    /// payment method is on file.
    #[tracing::instrument(skip(self))]
    pub async fn check_session(&self, developer_id: &str) -> Result<SessionResult, SessionError> {
        let Ok(id) = Uuid::parse_str(developer_id) else {
            self.notifier
                .emit(LicenseEvent::session_failed(developer_id, "malformed developer id"));
            return Err(SessionError::NotFound(developer_id.to_string()));
        };

        let _guard = self.locks.acquire(id).await;

        let developer = match self.store.get_by_id(id).await {
            Ok(Some(d)) => d,
            Ok(None) => {
                self.notifier
                    .emit(LicenseEvent::session_failed(developer_id, "developer not found"));
                return Err(SessionError::NotFound(developer_id.to_string()));
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load developer");
                self.notifier
                    .emit(LicenseEvent::session_failed(developer_id, &e.to_string()));
                return Err(e.into());
            }
        };

        let now = Utc::now();
        match evaluate(&developer, now) {
            Err(e) => {
                tracing::error!(error = %e, "developer record has no expiration");
                self.notifier
                    .emit(LicenseEvent::session_failed(developer_id, &e.to_string()));
                Err(SessionError::InvalidInput { developer_id: id })
            }
            Ok(LicenseState::Active) => {
                self.notifier.emit(LicenseEvent::session_found(&developer));
                Ok(SessionResult::Active(developer))
            }
            Ok(LicenseState::ExpiredNoPaymentMethod) => {
                tracing::info!(expiration = ?developer.expiration, "license expired, no payment method");
                self.notifier.emit(LicenseEvent::trial_expired(&developer));
                Ok(SessionResult::Expired(developer))
            }
            Ok(LicenseState::ExpiredWithPaymentMethod) => self.renew(developer, now).await,
        }
    }

    async fn renew(
        &self,
        developer: Developer,
        now: chrono::DateTime<Utc>,
    ) -> Result<SessionResult, SessionError> {
        let amount = self.policy.renewal_amount_cents;
        let request = ChargeRequest {
            payment_method_token: developer.payment_method().unwrap_or_default().to_string(),
            amount_minor_units: amount,
            currency: self.policy.currency.clone(),
            description: self.policy.renewal_description.clone(),
            idempotency_key: Some(renewal_idempotency_key(&developer)),
        };

        let charge = match tokio::time::timeout(self.policy.charge_timeout, self.gateway.charge(&request)).await {
            Ok(Ok(charge)) => charge,
            Ok(Err(e)) => return Ok(self.renewal_failed(developer, e)),
            Err(_) => {
                let e = GatewayError::Indeterminate(format!(
                    "no gateway response within {}s",
                    self.policy.charge_timeout.as_secs()
                ));
                return Ok(self.renewal_failed(developer, e));
            }
        };

        let update = DeveloperUpdate {
            expiration: Some(period_end(now, self.policy.renewal_period)),
            is_paid: (!developer.is_paid).then_some(true),
            ..Default::default()
        };

        match self
            .store
            .advance_expiration(developer.id, developer.expiration, &update)
            .await
        {
            Ok(SwapOutcome::Applied(renewed)) => {
                tracing::info!(
                    charge_id = %charge,
                    amount,
                    expiration = ?renewed.expiration,
                    "license renewed"
                );
                self.notifier.emit(LicenseEvent::payment_recurred(
                    &renewed,
                    &charge,
                    amount,
                    &self.policy.currency,
                ));
                Ok(SessionResult::Renewed(renewed))
            }
            Ok(SwapOutcome::Conflict) => self.resolve_conflict(developer, charge).await,
            Err(e) => {
                tracing::error!(
                    charge_id = %charge,
                    developer_id = %developer.id,
                    amount,
                    error = %e,
                    "renewal charged but expiration not persisted, manual reconciliation required"
                );
                self.notifier.emit(LicenseEvent::renewal_diverged(
                    &developer,
                    &charge,
                    amount,
                    &e.to_string(),
                ));
                Err(SessionError::Store {
                    source: e,
                    charge_id: Some(charge),
                })
            }
        }
    }

    fn renewal_failed(&self, developer: Developer, error: GatewayError) -> SessionResult {
        tracing::warn!(outcome = error.outcome(), error = %error, "renewal charge failed");
        self.notifier.emit(LicenseEvent::payment_failed(
            &developer,
            "renewal",
            error.outcome(),
            &error.to_string(),
        ));
        SessionResult::RenewalFailed {
            developer,
            reason: error.into(),
        }
    }

    /// The expiration moved under us after we charged. Give the money back and
    /// report whatever the record says now.
    async fn resolve_conflict(
        &self,
        developer: Developer,
        charge: ChargeId,
    ) -> Result<SessionResult, SessionError> {
        let amount = self.policy.renewal_amount_cents;
        tracing::warn!(charge_id = %charge, "expiration changed during renewal, refunding");

        if let Err(e) = self.gateway.refund(&charge).await {
            tracing::error!(
                charge_id = %charge,
                developer_id = %developer.id,
                amount,
                error = %e,
                "refund of superseded renewal failed, manual reconciliation required"
            );
            self.notifier.emit(LicenseEvent::renewal_diverged(
                &developer,
                &charge,
                amount,
                &format!("refund failed: {}", e),
            ));
        }

        let current = self
            .store
            .get_by_id(developer.id)
            .await?
            .ok_or_else(|| SessionError::NotFound(developer.id.to_string()))?;

        match evaluate(&current, Utc::now()) {
            Ok(LicenseState::Active) => {
                self.notifier.emit(LicenseEvent::session_found(&current));
                Ok(SessionResult::Active(current))
            }
            Ok(_) => Ok(SessionResult::RenewalFailed {
                developer: current,
                reason: RenewalFailure::Superseded,
            }),
            Err(_) => Err(SessionError::InvalidInput {
                developer_id: current.id,
            }),
        }
    }
}

/// Stable for one lapsed period: two attempts to renew the same expiration
/// share a key, so the gateway collapses them into one charge.
fn renewal_idempotency_key(developer: &Developer) -> String {
    let period = developer
        .expiration
        .map(|e| e.timestamp_micros())
        .unwrap_or_default();
    format!("renewal-{}-{}", developer.id, period)
}
