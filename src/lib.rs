//! Broome: developer licensing service.
//!
//! Tracks each developer's license window, renews lapsed licenses against a
//! stored payment method, and serves the JSON API the client calls on start.

use std::sync::Arc;

pub mod accounts;
pub mod api;
pub mod auth;
pub mod config;
pub mod errors;
pub mod license;
pub mod metrics;
pub mod models;
pub mod notification;
pub mod payment;
pub mod store;

use accounts::AccountService;
use config::Config;
use license::locks::DeveloperLocks;
use license::renewal::RenewalOrchestrator;
use license::signup::SignupService;
use metrics::PrometheusRecorder;
use notification::EventNotifier;
use payment::PaymentGateway;
use store::DeveloperStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: Config,
    pub sessions: RenewalOrchestrator,
    pub signups: SignupService,
    pub accounts: AccountService,
    pub metrics: Arc<PrometheusRecorder>,
}

impl AppState {
    /// Wire the services around one store, gateway and event sink. Renewal and
    /// purchase share a lock table so they never charge the same developer
    /// concurrently.
    pub fn new(
        config: Config,
        store: Arc<dyn DeveloperStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn EventNotifier>,
        metrics: Arc<PrometheusRecorder>,
    ) -> Self {
        let locks = DeveloperLocks::new();
        let policy = config.billing.clone();

        Self {
            sessions: RenewalOrchestrator::new(
                store.clone(),
                gateway.clone(),
                notifier.clone(),
                policy.clone(),
                locks.clone(),
            ),
            signups: SignupService::new(store.clone(), gateway, notifier.clone(), policy.clone(), locks),
            accounts: AccountService::new(store, notifier, &policy),
            metrics,
            config,
        }
    }
}
