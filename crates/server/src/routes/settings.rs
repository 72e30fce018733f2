//! Generic per-user settings (the same store the credential resolver reads
//! the watch region from). Values are opaque JSON.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::auth::Principal;
use crate::error::AppError;
use crate::state::AppState;

pub async fn get_setting(
    State(state): State<AppState>,
    principal: Principal,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let value = state
        .db
        .get_setting(&principal.id, &key)
        .await?
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or(serde_json::Value::Null);
    Ok(Json(value))
}

pub async fn put_setting(
    State(state): State<AppState>,
    principal: Principal,
    Path(key): Path<String>,
    Json(value): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .db
        .put_setting(&principal.id, &key, &value.to_string())
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}
