//! Initial grants: free trials and first purchases.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use super::locks::DeveloperLocks;
use super::period_end;
use crate::auth;
use crate::config::BillingPolicy;
use crate::models::developer::{Developer, DeveloperQuery, DeveloperUpdate, NewDeveloper};
use crate::notification::{EventNotifier, LicenseEvent};
use crate::payment::{ChargeId, ChargeRequest, CustomerRequest, GatewayError, PaymentGateway};
use crate::store::{DeveloperStore, StoreError, SwapOutcome};

/// Conditional writes retried before a purchase gives up and refunds.
const MAX_GRANT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct TrialSignup {
    /// Client-chosen id; a fresh one is generated when absent.
    pub id: Option<Uuid>,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default)]
pub struct PaidSignup {
    pub name: String,
    pub email: String,
    pub password: Option<String>,
    /// One-time card source from the checkout form.
    pub source: String,
}

#[derive(Debug, Error)]
pub enum SignupError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("email already exists")]
    DuplicateEmail,

    #[error("developer {0} already exists")]
    AlreadyExists(Uuid),

    #[error("invalid token")]
    NotFound,

    #[error(transparent)]
    Payment(#[from] GatewayError),

    /// `charge_id` is set when the developer was charged but nothing was
    /// granted and the refund did not go through.
    #[error("store error: {source}")]
    Store {
        #[source]
        source: StoreError,
        charge_id: Option<ChargeId>,
    },
}

impl From<StoreError> for SignupError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail => SignupError::DuplicateEmail,
            other => SignupError::Store {
                source: other,
                charge_id: None,
            },
        }
    }
}

pub struct SignupService {
    store: Arc<dyn DeveloperStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn EventNotifier>,
    policy: BillingPolicy,
    locks: DeveloperLocks,
}

impl SignupService {
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

    /// Silent signup from the client: a trial window, no payment method.
    pub async fn start_trial(&self, req: TrialSignup) -> Result<Developer, SignupError> {
        let email = required(&req.email, "email")?;

        if let Some(id) = req.id {
            if self.store.get_by_id(id).await?.is_some() {
                return Err(SignupError::AlreadyExists(id));
            }
        }

        let id = req.id.unwrap_or_else(Uuid::new_v4);
        let developer = self
            .store
            .insert(NewDeveloper {
                id,
                name: req.name.trim().to_string(),
                email,
                token: auth::generate_token(),
                password_hash: String::new(),
                salt: String::new(),
                expiration: period_end(Utc::now(), self.policy.trial_period),
                payment_method_token: None,
                is_paid: false,
                is_admin: false,
                integration_engineer: None,
            })
            .await
            .map_err(|e| match e {
                // a concurrent signup claimed the id after the check above
                StoreError::DuplicateId => SignupError::AlreadyExists(id),
                other => other.into(),
            })?;

        tracing::info!(developer_id = %developer.id, expiration = ?developer.expiration, "trial started");
        self.notifier.emit(LicenseEvent::trial_started(&developer));
        Ok(developer)
    }

    /// Attach a card to an existing developer and charge the first period.
    /// Nothing is persisted unless the charge succeeds.
    pub async fn attach_payment(&self, token: &str, source: &str) -> Result<Developer, SignupError> {
        let source = required(source, "source")?;
        let id = self
            .store
            .get_by_query(&DeveloperQuery::ByToken(token.to_string()))
            .await?
            .ok_or(SignupError::NotFound)?
            .id;

        let _guard = self.locks.acquire(id).await;
        let developer = self.store.get_by_id(id).await?.ok_or(SignupError::NotFound)?;

        let customer = CustomerRequest {
            email: developer.email.clone(),
            name: developer.name.clone(),
            source: source.clone(),
        };
        let idempotency_key = format!("purchase-{}-{}", developer.id, source);
        let (customer_id, charge) = match self.charge_new_customer(&customer, idempotency_key).await {
            Ok(ok) => ok,
            Err(e) => return Err(self.purchase_failed(&developer, e)),
        };

        let mut current = developer;
        for _ in 0..MAX_GRANT_ATTEMPTS {
            let base = current.expiration.map_or(Utc::now(), |e| e.max(Utc::now()));
            let update = DeveloperUpdate {
                expiration: Some(period_end(base, self.policy.renewal_period)),
                payment_method_token: Some(customer_id.clone()),
                is_paid: Some(true),
                ..Default::default()
            };

            match self
                .store
                .advance_expiration(current.id, current.expiration, &update)
                .await
            {
                Ok(SwapOutcome::Applied(paid)) => {
                    tracing::info!(developer_id = %paid.id, charge_id = %charge, "payment method attached");
                    self.notifier.emit(LicenseEvent::payment_new(
                        &paid,
                        &charge,
                        self.policy.initial_amount_cents,
                        &self.policy.currency,
                    ));
                    return Ok(paid);
                }
                Ok(SwapOutcome::Conflict) => {
                    current = self
                        .store
                        .get_by_id(current.id)
                        .await?
                        .ok_or(SignupError::NotFound)?;
                }
                Err(e) => return Err(self.undo_charge(&current, charge, e).await),
            }
        }

        let e = StoreError::Other("expiration kept changing during purchase".to_string());
        Err(self.undo_charge(&current, charge, e).await)
    }

    /// Create a brand-new, already-paid developer. The record is only
    /// inserted after the first charge succeeds.
    pub async fn signup_paid(&self, req: PaidSignup) -> Result<Developer, SignupError> {
        let email = required(&req.email, "email")?;
        let source = required(&req.source, "source")?;

        if self
            .store
            .get_by_query(&DeveloperQuery::ByEmail(email.clone()))
            .await?
            .is_some()
        {
            return Err(SignupError::DuplicateEmail);
        }

        let id = Uuid::new_v4();
        let customer = CustomerRequest {
            email: email.clone(),
            name: req.name.trim().to_string(),
            source: source.clone(),
        };
        let idempotency_key = format!("signup-{}-{}", email, source);
        let (customer_id, charge) = match self.charge_new_customer(&customer, idempotency_key).await {
            Ok(ok) => ok,
            Err(e) => {
                tracing::warn!(email = %email, outcome = e.outcome(), error = %e, "paid signup charge failed");
                self.notifier.emit(LicenseEvent::signup_payment_failed(
                    id,
                    &email,
                    e.outcome(),
                    &e.to_string(),
                ));
                return Err(e.into());
            }
        };

        let (salt, password_hash) = match req.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => {
                let salt = auth::generate_salt();
                let hash = auth::hash_password(password, &salt);
                (salt, hash)
            }
            None => (String::new(), String::new()),
        };

        let inserted = self
            .store
            .insert(NewDeveloper {
                id,
                name: customer.name,
                email: email.clone(),
                token: auth::generate_token(),
                password_hash,
                salt,
                expiration: period_end(Utc::now(), self.policy.renewal_period),
                payment_method_token: Some(customer_id),
                is_paid: true,
                is_admin: false,
                integration_engineer: None,
            })
            .await;

        match inserted {
            Ok(developer) => {
                tracing::info!(developer_id = %developer.id, charge_id = %charge, "paid signup");
                self.notifier.emit(LicenseEvent::developer_created(&developer));
                self.notifier.emit(LicenseEvent::payment_new(
                    &developer,
                    &charge,
                    self.policy.initial_amount_cents,
                    &self.policy.currency,
                ));
                Ok(developer)
            }
            Err(e) => {
                tracing::error!(charge_id = %charge, error = %e, "paid signup charged but not saved, refunding");
                match self.gateway.refund(&charge).await {
                    Ok(()) => Err(e.into()),
                    Err(refund_err) => {
                        let amount = self.policy.initial_amount_cents;
                        tracing::error!(
                            charge_id = %charge,
                            developer_id = %id,
                            amount,
                            error = %refund_err,
                            "refund failed, manual reconciliation required"
                        );
                        self.notifier.emit(LicenseEvent::signup_diverged(
                            id,
                            &email,
                            &charge,
                            amount,
                            &format!("{}; refund failed: {}", e, refund_err),
                        ));
                        Err(SignupError::Store {
                            source: e,
                            charge_id: Some(charge),
                        })
                    }
                }
            }
        }
    }

    async fn charge_new_customer(
        &self,
        customer: &CustomerRequest,
        idempotency_key: String,
    ) -> Result<(String, ChargeId), GatewayError> {
        let timeout = self.policy.charge_timeout;

        let customer_id = tokio::time::timeout(timeout, self.gateway.create_customer(customer))
            .await
            .map_err(|_| GatewayError::Unavailable("customer creation timed out".to_string()))??;

        let request = ChargeRequest {
            payment_method_token: customer_id.clone(),
            amount_minor_units: self.policy.initial_amount_cents,
            currency: self.policy.currency.clone(),
            description: self.policy.purchase_description.clone(),
            idempotency_key: Some(idempotency_key),
        };
        let charge = tokio::time::timeout(timeout, self.gateway.charge(&request))
            .await
            .map_err(|_| {
                GatewayError::Indeterminate(format!("no gateway response within {}s", timeout.as_secs()))
            })??;

        Ok((customer_id, charge))
    }

    fn purchase_failed(&self, developer: &Developer, error: GatewayError) -> SignupError {
        tracing::warn!(
            developer_id = %developer.id,
            outcome = error.outcome(),
            error = %error,
            "purchase charge failed"
        );
        self.notifier.emit(LicenseEvent::payment_failed(
            developer,
            "purchase",
            error.outcome(),
            &error.to_string(),
        ));
        error.into()
    }

    /// The charge went through but the grant could not be written.
    async fn undo_charge(&self, developer: &Developer, charge: ChargeId, error: StoreError) -> SignupError {
        let amount = self.policy.initial_amount_cents;
        tracing::error!(
            charge_id = %charge,
            developer_id = %developer.id,
            amount,
            error = %error,
            "purchase charged but not granted, refunding"
        );
        match self.gateway.refund(&charge).await {
            Ok(()) => SignupError::Store {
                source: error,
                charge_id: None,
            },
            Err(refund_err) => {
                self.notifier.emit(LicenseEvent::renewal_diverged(
                    developer,
                    &charge,
                    amount,
                    &format!("{}; refund failed: {}", error, refund_err),
                ));
                SignupError::Store {
                    source: error,
                    charge_id: Some(charge),
                }
            }
        }
    }
}

fn required(value: &str, field: &str) -> Result<String, SignupError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SignupError::InvalidInput(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}
