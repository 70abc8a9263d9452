pub mod slack;
pub mod webhook;

use std::sync::{Arc, Mutex};

use serde::Serialize;
use uuid::Uuid;

use crate::models::developer::Developer;
use crate::payment::ChargeId;

// ── Event Types ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DeveloperCreated,
    TrialStarted,
    TrialExpired,
    SessionFound,
    SessionFailed,
    PaymentNew,
    PaymentRecurred,
    PaymentFailed,
    /// Charged, but the new expiration was not persisted.
    RenewalDiverged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DeveloperCreated => "developer_created",
            EventKind::TrialStarted => "trial_started",
            EventKind::TrialExpired => "trial_expired",
            EventKind::SessionFound => "session_found",
            EventKind::SessionFailed => "session_failed",
            EventKind::PaymentNew => "payment_new",
            EventKind::PaymentRecurred => "payment_recurred",
            EventKind::PaymentFailed => "payment_failed",
            EventKind::RenewalDiverged => "renewal_diverged",
        }
    }
}

/// A structured outcome event handed to every configured sink.
#[derive(Debug, Clone, Serialize)]
pub struct LicenseEvent {
    #[serde(rename = "event_type")]
    pub kind: EventKind,
    /// ISO-8601 timestamp of when the event occurred.
    pub timestamp: String,
    pub developer_id: Option<Uuid>,
    /// Event-specific details (developer snapshot, charge id, reason, ...).
    pub details: serde_json::Value,
}

impl LicenseEvent {
    fn new(kind: EventKind, developer_id: Option<Uuid>, details: serde_json::Value) -> Self {
        Self {
            kind,
            timestamp: chrono::Utc::now().to_rfc3339(),
            developer_id,
            details,
        }
    }

    fn for_developer(kind: EventKind, dev: &Developer, mut extra: serde_json::Value) -> Self {
        if let Some(map) = extra.as_object_mut() {
            map.insert(
                "developer".to_string(),
                serde_json::to_value(dev.session_view()).unwrap_or_default(),
            );
        }
        Self::new(kind, Some(dev.id), extra)
    }

    pub fn developer_created(dev: &Developer) -> Self {
        Self::for_developer(EventKind::DeveloperCreated, dev, serde_json::json!({}))
    }

    pub fn trial_started(dev: &Developer) -> Self {
        Self::for_developer(EventKind::TrialStarted, dev, serde_json::json!({}))
    }

    pub fn trial_expired(dev: &Developer) -> Self {
        Self::for_developer(EventKind::TrialExpired, dev, serde_json::json!({}))
    }

    pub fn session_found(dev: &Developer) -> Self {
        Self::for_developer(EventKind::SessionFound, dev, serde_json::json!({}))
    }

    pub fn session_failed(developer_id: &str, reason: &str) -> Self {
        Self::new(
            EventKind::SessionFailed,
            Uuid::parse_str(developer_id).ok(),
            serde_json::json!({ "id": developer_id, "reason": reason }),
        )
    }

    pub fn payment_new(dev: &Developer, charge: &ChargeId, amount: i64, currency: &str) -> Self {
        Self::for_developer(
            EventKind::PaymentNew,
            dev,
            serde_json::json!({ "charge_id": charge.0, "amount": amount, "currency": currency }),
        )
    }

    pub fn payment_recurred(dev: &Developer, charge: &ChargeId, amount: i64, currency: &str) -> Self {
        Self::for_developer(
            EventKind::PaymentRecurred,
            dev,
            serde_json::json!({ "charge_id": charge.0, "amount": amount, "currency": currency }),
        )
    }

    /// `purpose` is "renewal" or "purchase"; `outcome` is the failure class.
    pub fn payment_failed(dev: &Developer, purpose: &str, outcome: &str, reason: &str) -> Self {
        Self::for_developer(
            EventKind::PaymentFailed,
            dev,
            serde_json::json!({ "purpose": purpose, "outcome": outcome, "reason": reason }),
        )
    }

    /// A purchase failed before any developer record was written.
    pub fn signup_payment_failed(developer_id: Uuid, email: &str, outcome: &str, reason: &str) -> Self {
        Self::new(
            EventKind::PaymentFailed,
            Some(developer_id),
            serde_json::json!({
                "purpose": "purchase",
                "email": email,
                "outcome": outcome,
                "reason": reason,
            }),
        )
    }

    /// A purchase was charged, never saved, and could not be refunded.
    pub fn signup_diverged(developer_id: Uuid, email: &str, charge: &ChargeId, amount: i64, error: &str) -> Self {
        Self::new(
            EventKind::RenewalDiverged,
            Some(developer_id),
            serde_json::json!({
                "email": email,
                "charge_id": charge.0,
                "amount": amount,
                "error": error,
            }),
        )
    }

    pub fn renewal_diverged(dev: &Developer, charge: &ChargeId, amount: i64, error: &str) -> Self {
        Self::for_developer(
            EventKind::RenewalDiverged,
            dev,
            serde_json::json!({ "charge_id": charge.0, "amount": amount, "error": error }),
        )
    }
}

// ── Sinks ─────────────────────────────────────────────────────

/// Fire-and-forget event sink. `emit` must return immediately and never
/// fail; any I/O happens on a spawned task.
pub trait EventNotifier: Send + Sync {
    fn emit(&self, event: LicenseEvent);
}

/// Fans one event out to every configured sink.
#[derive(Clone, Default)]
pub struct NotifierHub {
    sinks: Vec<Arc<dyn EventNotifier>>,
}

impl NotifierHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventNotifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventNotifier for NotifierHub {
    fn emit(&self, event: LicenseEvent) {
        tracing::debug!(
            event_type = event.kind.as_str(),
            developer_id = ?event.developer_id,
            "license event"
        );
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

/// Keeps every event in memory. Used by tests and the CLI `developer check`
/// command to report what a session check emitted.
#[derive(Clone, Default)]
pub struct MemoryNotifier {
    events: Arc<Mutex<Vec<LicenseEvent>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LicenseEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

impl EventNotifier for MemoryNotifier {
    fn emit(&self, event: LicenseEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
