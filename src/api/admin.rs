use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::accounts::AdminUpdateRequest;
use crate::errors::AppError;
use crate::models::developer::PublicDeveloper;
use crate::AppState;

/// GET /admin/developers: every developer, newest first
pub async fn list_developers(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let developers: Vec<PublicDeveloper> = state
        .accounts
        .list()
        .await?
        .iter()
        .map(|d| d.public())
        .collect();
    Ok(Json(json!({ "status": "found", "developers": developers })))
}

/// GET /admin/developers/:token
pub async fn get_developer(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<Value>, AppError> {
    let developer = state.accounts.by_token(&token).await?;
    Ok(Json(json!({ "status": "found", "developer": developer.public() })))
}

/// PUT /admin/developers/:token: set the license window or admin flag
pub async fn update_developer(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(req): Json<AdminUpdateRequest>,
) -> Result<Json<Value>, AppError> {
    let developer = state.accounts.admin_update(&token, req).await?;
    Ok(Json(json!({ "status": "updated", "developer": developer.public() })))
}
