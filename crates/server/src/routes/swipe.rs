//! Swipe and match endpoints.

use axum::{extract::State, Json};
use shared::{MatchedItem, SwipeRequest, SwipeResponse};

use crate::auth::Principal;
use crate::error::AppError;
use crate::routes::active_session_code;
use crate::state::AppState;

/// POST /swipe — scoped to the caller's session (solo when they have none).
/// Duplicate swipes are a normal success, never an error.
pub async fn swipe(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<SwipeRequest>,
) -> Result<Json<SwipeResponse>, AppError> {
    if req.item_id.is_empty() {
        return Err(AppError::BadRequest("itemId is required".to_string()));
    }

    let session_code = active_session_code(&state, &principal).await?;

    // Resolving credentials validates the caller can act at all — a guest
    // whose host revoked lending is stopped here, before any write.
    state
        .resolver
        .resolve(&principal, session_code.as_deref())
        .await?;

    let outcome = state
        .engine
        .record_swipe(
            &principal.id,
            session_code.as_deref(),
            &req.item_id,
            req.direction,
        )
        .await?;

    Ok(Json(SwipeResponse {
        success: true,
        is_match: outcome.is_match,
    }))
}

/// GET /matches — matched items in the caller's session, newest first.
/// Empty when the caller has no active session.
pub async fn matches(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<MatchedItem>>, AppError> {
    let code = match active_session_code(&state, &principal).await? {
        Some(code) => code,
        None => return Ok(Json(Vec::new())),
    };

    let rows = state.db.get_matched_items(&code).await?;
    Ok(Json(
        rows.into_iter()
            .map(|row| MatchedItem {
                item_id: row.item_id,
                // SQLite CURRENT_TIMESTAMP rows are naive UTC.
                matched_at: row.matched_at.and_then(|raw| {
                    chrono::NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
                        .ok()
                        .map(|n| n.and_utc())
                }),
            })
            .collect(),
    ))
}
