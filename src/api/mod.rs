use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};

use crate::auth::constant_time_eq;
use crate::AppState;

pub mod admin;
pub mod handlers;

/// Build the public router. Global layers (tracing, CORS, body limits) are
/// added by the caller.
pub fn router(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route("/developers", get(admin::list_developers))
        .route(
            "/developers/:token",
            get(admin::get_developer).put(admin::update_developer),
        )
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .route("/developers", post(handlers::create_developer))
        .route("/developers/token", post(handlers::login))
        .route("/developers/me", get(handlers::current_developer))
        .route("/developers/reset/:token", put(handlers::edit_password))
        // GET takes a developer id; PUT and /pay take a bearer token
        .route(
            "/developers/:key",
            get(handlers::developer_by_id).put(handlers::update_developer),
        )
        .route("/developers/:key/pay", post(handlers::attach_payment))
        .route("/session/:id", get(handlers::check_session))
        .route("/signup", post(handlers::signup))
        .nest("/admin", admin)
        .fallback(fallback_404)
        .with_state(state)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: validates `X-Admin-Key` (or a bearer token) against the
/// configured admin key.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    match provided_key {
        Some(k) if constant_time_eq(k, &state.config.admin_key) => Ok(next.run(req).await),
        Some(k) => {
            let masked = if k.is_ascii() && k.len() > 8 {
                format!("{}…{}", &k[..4], &k[k.len() - 4..])
            } else {
                "****".to_string()
            };
            tracing::warn!(provided = %masked, "admin API: invalid key");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
