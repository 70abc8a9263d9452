//! License state machine.
//!
//! `evaluate` classifies a developer at a point in time; [`renewal`] drives
//! the charge-and-extend transition for lapsed licenses and [`signup`]
//! creates the initial trial or paid window.

pub mod locks;
pub mod renewal;
pub mod signup;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::developer::Developer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseState {
    /// `expiration` is strictly after now.
    Active,
    /// Lapsed and nothing to bill.
    ExpiredNoPaymentMethod,
    /// Lapsed with a stored payment method: renewal can be attempted.
    ExpiredWithPaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LicenseError {
    /// A persisted developer without an expiration is a data-integrity fault.
    #[error("developer {developer_id} has no expiration set")]
    InvalidInput { developer_id: Uuid },
}

/// Classify `developer` at `now`. Pure; the only failure is a missing expiration.
pub fn evaluate(developer: &Developer, now: DateTime<Utc>) -> Result<LicenseState, LicenseError> {
    let expiration = developer.expiration.ok_or(LicenseError::InvalidInput {
        developer_id: developer.id,
    })?;

    if expiration > now {
        return Ok(LicenseState::Active);
    }

    Ok(match developer.payment_method() {
        Some(_) => LicenseState::ExpiredWithPaymentMethod,
        None => LicenseState::ExpiredNoPaymentMethod,
    })
}

/// End of a period that starts at `from`, truncated to the microsecond
/// precision the store keeps so that later compare-and-swaps match.
pub fn period_end(from: DateTime<Utc>, period: chrono::Duration) -> DateTime<Utc> {
    (from + period).trunc_subsecs(6)
}
