//! Session lifecycle endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use shared::{
    CreateSessionRequest, GuestJoinRequest, JoinSessionRequest, MemberInfo, SessionCreatedResponse,
    SessionInfo, TokenResponse,
};

use crate::auth::{mint_token, Principal};
use crate::error::AppError;
use crate::routes::active_session_code;
use crate::state::AppState;

/// POST /sessions — start hosting.
pub async fn create_session(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<SessionCreatedResponse>, AppError> {
    let provider_config = req.provider_config.map(|v| v.to_string());
    let session = state
        .sessions
        .create(
            &principal,
            &req.provider,
            provider_config,
            req.match_strategy.unwrap_or_default(),
        )
        .await?;
    Ok(Json(SessionCreatedResponse { code: session.code }))
}

/// GET /sessions/:code — lobby info.
pub async fn session_info(
    State(state): State<AppState>,
    _principal: Principal,
    Path(code): Path<String>,
) -> Result<Json<SessionInfo>, AppError> {
    let session = state
        .db
        .get_session(&code)
        .await?
        .ok_or_else(|| AppError::SessionNotFound(code))?;
    Ok(Json(SessionInfo {
        lending_enabled: session.lending_enabled(),
        code: session.code,
        host_principal_id: session.host_principal_id,
        provider: session.provider,
        match_strategy: shared::MatchStrategy::parse(&session.match_strategy)
            .unwrap_or_default(),
    }))
}

/// POST /sessions/:code/join — join as an authenticated principal.
pub async fn join_session(
    State(state): State<AppState>,
    principal: Principal,
    Path(code): Path<String>,
    Json(req): Json<JoinSessionRequest>,
) -> Result<Json<SessionCreatedResponse>, AppError> {
    let filters = req.filters.map(|v| v.to_string());
    let session = state.sessions.join(&code, &principal, filters).await?;
    Ok(Json(SessionCreatedResponse { code: session.code }))
}

/// POST /sessions/:code/guest — join without an account; mints a guest
/// principal acting through the host's credentials and returns its token.
pub async fn guest_join(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(req): Json<GuestJoinRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    if req.display_name.trim().is_empty() {
        return Err(AppError::BadRequest("Display name is required".to_string()));
    }

    let (_, guest) = state.sessions.guest_join(&code, req.display_name.trim()).await?;
    let token = mint_token(&guest, &state.config.auth)?;
    Ok(Json(TokenResponse {
        token,
        principal_id: guest.id,
    }))
}

/// POST /sessions/:code/revoke — host stops lending credentials to guests.
pub async fn revoke_lending(
    State(state): State<AppState>,
    principal: Principal,
    Path(code): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.sessions.revoke_lending(&code, &principal).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// DELETE /sessions/:code — host clears their data.
pub async fn delete_session(
    State(state): State<AppState>,
    principal: Principal,
    Path(code): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.sessions.delete(&code, &principal).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// GET /session/members — members of the caller's session.
pub async fn members(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<MemberInfo>>, AppError> {
    let code = match active_session_code(&state, &principal).await? {
        Some(code) => code,
        None => return Ok(Json(Vec::new())),
    };

    let members = state.sessions.members(&code).await?;
    Ok(Json(
        members
            .into_iter()
            .map(|m| MemberInfo {
                principal_id: m.principal_id,
                display_name: m.display_name,
                filters: m.filters.and_then(|f| serde_json::from_str(&f).ok()),
            })
            .collect(),
    ))
}

/// PUT /session/filters — update the caller's per-member filter settings.
pub async fn update_filters(
    State(state): State<AppState>,
    principal: Principal,
    Json(filters): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let code = active_session_code(&state, &principal)
        .await?
        .ok_or_else(|| AppError::BadRequest("Not in a session".to_string()))?;

    let updated = state
        .db
        .update_member_filters(&code, &principal.id, Some(&filters.to_string()))
        .await?;
    if !updated {
        return Err(AppError::SessionNotFound(code));
    }
    state
        .bus
        .publish(shared::event_type::SESSION_UPDATE, code.as_str());
    Ok(Json(serde_json::json!({ "success": true })))
}
