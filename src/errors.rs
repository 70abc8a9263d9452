use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::accounts::AccountError;
use crate::license::renewal::{RenewalFailure, SessionError};
use crate::license::signup::SignupError;
use crate::payment::GatewayError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("charge declined: {0}")]
    PaymentDeclined(String),

    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("payment outcome unknown: {0}")]
    GatewayIndeterminate(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PaymentDeclined(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::GatewayIndeterminate(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "invalid_request",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::PaymentDeclined(_) => "payment_declined",
            AppError::GatewayUnavailable(_) => "gateway_unavailable",
            AppError::GatewayIndeterminate(_) => "gateway_indeterminate",
            AppError::Store(_) | AppError::Internal(_) => "internal_server_error",
        }
    }

    /// Message safe to return to the caller. Internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::Store(e) => {
                tracing::error!("store error: {}", e);
                "internal server error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("internal error: {:#}", e);
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "status": "failed",
            "error": self.public_message(),
            "code": self.code(),
        }));

        self.with_headers((self.status_code(), body).into_response())
    }
}

impl AppError {
    /// Adds `Retry-After` when the gateway could not be reached.
    pub(crate) fn with_headers(&self, mut response: Response) -> Response {
        if matches!(self, AppError::GatewayUnavailable(_)) {
            response.headers_mut().insert(
                "retry-after",
                axum::http::HeaderValue::from_static("60"),
            );
        }
        response
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Declined(m) => AppError::PaymentDeclined(m),
            GatewayError::Unavailable(m) => AppError::GatewayUnavailable(m),
            GatewayError::Indeterminate(m) => AppError::GatewayIndeterminate(m),
        }
    }
}

impl From<RenewalFailure> for AppError {
    fn from(f: RenewalFailure) -> Self {
        match f {
            RenewalFailure::Declined(m) => AppError::PaymentDeclined(m),
            RenewalFailure::Unavailable(m) => AppError::GatewayUnavailable(m),
            RenewalFailure::Indeterminate(m) => AppError::GatewayIndeterminate(m),
            RenewalFailure::Superseded => AppError::Conflict(f.message()),
        }
    }
}

impl From<AccountError> for AppError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::InvalidInput(m) => AppError::BadRequest(m),
            AccountError::NotFound(m) => AppError::NotFound(m),
            AccountError::InvalidCredentials(m) => AppError::Unauthorized(m),
            AccountError::DuplicateEmail => AppError::Conflict("email already exists".to_string()),
            AccountError::Store(e) => AppError::Store(e),
        }
    }
}

impl From<SignupError> for AppError {
    fn from(e: SignupError) -> Self {
        match e {
            SignupError::InvalidInput(m) => AppError::BadRequest(m),
            SignupError::DuplicateEmail | SignupError::AlreadyExists(_) => AppError::Conflict(e.to_string()),
            SignupError::NotFound => AppError::NotFound("Invalid Token.".to_string()),
            SignupError::Payment(g) => g.into(),
            SignupError::Store { source, charge_id } => {
                if let Some(charge) = charge_id {
                    tracing::error!(charge_id = %charge, "request failed with an unreconciled charge");
                }
                AppError::Store(source)
            }
        }
    }
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(id) => AppError::NotFound(format!("developer {} not found", id)),
            SessionError::InvalidInput { .. } => AppError::Internal(anyhow::anyhow!(e)),
            SessionError::Store { source, .. } => AppError::Store(source),
        }
    }
}
