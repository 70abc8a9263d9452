//! Prometheus metrics for license outcomes.
//!
//! The recorder is just another event sink: every `LicenseEvent` bumps a
//! counter, and payment events additionally feed the charge counter.
//! Metrics live in the recorder's own registry and are served on `/metrics`.

use prometheus::{opts, CounterVec, Encoder, IntCounter, Registry, TextEncoder};

use crate::notification::{EventKind, EventNotifier, LicenseEvent};

pub struct PrometheusRecorder {
    registry: Registry,
    events_total: CounterVec,
    charges_total: CounterVec,
    divergence_total: IntCounter,
}

impl PrometheusRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let events_total = CounterVec::new(
            opts!("broome_license_events_total", "License events by type"),
            &["event_type"],
        )?;
        let charges_total = CounterVec::new(
            opts!("broome_charges_total", "Gateway charges by purpose and outcome"),
            &["purpose", "outcome"],
        )?;
        let divergence_total = IntCounter::new(
            "broome_renewal_divergence_total",
            "Successful renewal charges whose new expiration failed to persist",
        )?;

        registry.register(Box::new(events_total.clone()))?;
        registry.register(Box::new(charges_total.clone()))?;
        registry.register(Box::new(divergence_total.clone()))?;

        Ok(Self {
            registry,
            events_total,
            charges_total,
            divergence_total,
        })
    }

    pub fn record(&self, event: &LicenseEvent) {
        self.events_total
            .with_label_values(&[event.kind.as_str()])
            .inc();

        match event.kind {
            EventKind::PaymentNew => {
                self.charges_total.with_label_values(&["purchase", "success"]).inc();
            }
            EventKind::PaymentRecurred => {
                self.charges_total.with_label_values(&["renewal", "success"]).inc();
            }
            EventKind::PaymentFailed => {
                let purpose = event.details["purpose"].as_str().unwrap_or("unknown");
                let outcome = event.details["outcome"].as_str().unwrap_or("unknown");
                self.charges_total.with_label_values(&[purpose, outcome]).inc();
            }
            EventKind::RenewalDiverged => {
                self.divergence_total.inc();
            }
            _ => {}
        }
    }

    /// Encode all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl EventNotifier for PrometheusRecorder {
    fn emit(&self, event: LicenseEvent) {
        self.record(&event);
    }
}

// ── Tests ─────────────────────────────────────────────────────
