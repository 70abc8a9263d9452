use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::accounts::{Credentials, UpdateRequest};
use crate::errors::AppError;
use crate::license::renewal::SessionResult;
use crate::license::signup::{PaidSignup, TrialSignup};
use crate::AppState;

// ── Request DTOs ──────────────────────────────────────────────

#[derive(Deserialize)]
pub struct TokenParams {
    pub token: Option<String>,
}

#[derive(Deserialize)]
pub struct PaymentRequest {
    #[serde(alias = "stripeToken")]
    pub source: String,
}

#[derive(Deserialize)]
pub struct PasswordEditRequest {
    pub id: String,
    #[serde(alias = "new")]
    pub password: String,
}

#[derive(Default, Deserialize)]
pub struct SignupRequest {
    pub id: Option<Uuid>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "stripeEmail")]
    pub stripe_email: Option<String>,
    pub password: Option<String>,
    /// Card source; when present the signup is paid instead of a trial.
    #[serde(alias = "stripeToken")]
    pub source: Option<String>,
}

// ── Handlers ─────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

/// GET /metrics: Prometheus text format
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

/// POST /developers: register with email and password
pub async fn create_developer(
    State(state): State<Arc<AppState>>,
    Json(creds): Json<Credentials>,
) -> Result<Json<Value>, AppError> {
    let developer = state.accounts.create_developer(creds).await?;
    Ok(Json(json!({ "status": "created", "developer": developer.public() })))
}

/// POST /developers/token: log in, rotating the token
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(creds): Json<Credentials>,
) -> Result<Json<Value>, AppError> {
    let token = state.accounts.login(creds).await?;
    Ok(Json(json!({ "status": "created", "token": token })))
}

/// GET /developers/me?token=
pub async fn current_developer(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TokenParams>,
) -> Result<Json<Value>, AppError> {
    let developer = state
        .accounts
        .current(params.token.as_deref().unwrap_or_default())
        .await?;
    Ok(Json(json!({ "status": "found", "developer": developer.public() })))
}

/// GET /developers/:id?token=
pub async fn developer_by_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<TokenParams>,
) -> Result<Json<Value>, AppError> {
    let view = state
        .accounts
        .public_by_id(&id, params.token.as_deref().unwrap_or_default())
        .await?;
    Ok(Json(json!({ "status": "found", "developer": view })))
}

/// PUT /developers/:token
pub async fn update_developer(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<Value>, AppError> {
    let developer = state.accounts.update(&token, req).await?;
    Ok(Json(json!({ "status": "updated", "developer": developer.public() })))
}

/// PUT /developers/reset/:token
pub async fn edit_password(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(req): Json<PasswordEditRequest>,
) -> Result<Json<Value>, AppError> {
    let developer = state
        .accounts
        .edit_password(&token, &req.id, &req.password)
        .await?;
    Ok(Json(json!({ "status": "success", "developer": developer.public() })))
}

/// POST /developers/:key/pay: attach a card and charge the first period
pub async fn attach_payment(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(req): Json<PaymentRequest>,
) -> Result<Json<Value>, AppError> {
    let developer = state.signups.attach_payment(&token, &req.source).await?;
    Ok(Json(json!({ "status": "success", "developer": developer.public() })))
}

/// POST /signup: trial signup from the client, or a paid signup when a
/// card source is supplied.
pub async fn signup(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<Json<Value>, AppError> {
    let email = req
        .stripe_email
        .filter(|e| !e.is_empty())
        .unwrap_or(req.email);

    let developer = match req.source.filter(|s| !s.is_empty()) {
        Some(source) => {
            state
                .signups
                .signup_paid(PaidSignup {
                    name: req.name,
                    email,
                    password: req.password,
                    source,
                })
                .await?
        }
        None => {
            state
                .signups
                .start_trial(TrialSignup {
                    id: req.id,
                    name: req.name,
                    email,
                })
                .await?
        }
    };

    Ok(Json(json!({ "status": "created", "developer": developer.public() })))
}

/// GET /session/:id: called on every client start. Renews a lapsed
/// license when a payment method is on file.
pub async fn check_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.sessions.check_session(&id).await {
        Ok(SessionResult::RenewalFailed { developer, reason }) => {
            let err = AppError::from(reason);
            let body = json!({
                "status": "failed",
                "error": err.to_string(),
                "code": err.code(),
                "developer": developer.session_view(),
            });
            err.with_headers((err.status_code(), Json(body)).into_response())
        }
        Ok(result) => {
            let body = json!({
                "status": result.status(),
                "developer": result.developer().session_view(),
            });
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => AppError::from(e).into_response(),
    }
}
