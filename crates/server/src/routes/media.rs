//! Provider passthrough.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::auth::Principal;
use crate::credentials::EffectiveCredentials;
use crate::error::AppError;
use crate::provider::{Genre, ItemDetails, Library};
use crate::routes::active_session_code;
use crate::state::AppState;

async fn effective_credentials(
    state: &AppState,
    principal: &Principal,
) -> Result<EffectiveCredentials, AppError> {
    let session_code = active_session_code(state, principal).await?;
    state.resolver.resolve(principal, session_code.as_deref()).await
}

/// GET /media/:item_id — item details fetched with the caller's effective
/// credentials (a guest fetches through the host).
pub async fn item_details(
    State(state): State<AppState>,
    principal: Principal,
    Path(item_id): Path<String>,
) -> Result<Json<ItemDetails>, AppError> {
    let creds = effective_credentials(&state, &principal).await?;
    let details = state
        .provider
        .item_details(&item_id, &creds)
        .await
        .map_err(AppError::Provider)?;
    Ok(Json(details))
}

/// GET /media/libraries
pub async fn libraries(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<Library>>, AppError> {
    let creds = effective_credentials(&state, &principal).await?;
    let libraries = state
        .provider
        .libraries(&creds)
        .await
        .map_err(AppError::Provider)?;
    Ok(Json(libraries))
}

/// GET /media/genres
pub async fn genres(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<Genre>>, AppError> {
    let creds = effective_credentials(&state, &principal).await?;
    let genres = state
        .provider
        .genres(&creds)
        .await
        .map_err(AppError::Provider)?;
    Ok(Json(genres))
}
