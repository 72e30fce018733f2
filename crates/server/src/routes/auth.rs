//! Token issuance.
//!
//! External identity verification happens upstream; this endpoint is the
//! trusted boundary where an already-verified principal (and its provider
//! credentials) is exchanged for a couchmatch token. Guest tokens are minted
//! by the guest-join endpoint instead.

use axum::{extract::State, Json};
use shared::{TokenRequest, TokenResponse};

use crate::auth::{mint_token, Identity, Principal};
use crate::error::AppError;
use crate::state::AppState;

pub async fn issue_token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    if req.principal_id.is_empty() || req.principal_id.starts_with("guest:") {
        return Err(AppError::BadRequest("Invalid principal id".to_string()));
    }

    let principal = Principal {
        id: req.principal_id,
        display_name: req.display_name,
        identity: Identity::Owner(req.credentials),
    };

    let token = mint_token(&principal, &state.config.auth)?;
    tracing::info!(principal = %principal.id, "token issued");

    Ok(Json(TokenResponse {
        token,
        principal_id: principal.id,
    }))
}
