use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// No valid principal on the request.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// A guest tried to act through a host who cleared their token.
    #[error("host has revoked guest access")]
    GuestAccessRevoked,

    /// The named session does not exist (join / lookup path).
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A non-guest principal claimed a session code with no session behind it.
    #[error("no session for claimed code: {0}")]
    MissingSession(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Upstream media-provider failure; details stay in the logs.
    #[error("provider request failed")]
    Provider(anyhow::Error),

    /// Storage or other unexpected failure; details stay in the logs.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{err:#}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            AppError::GuestAccessRevoked => (StatusCode::FORBIDDEN, "guest_access_revoked"),
            AppError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "session_not_found"),
            AppError::MissingSession(_) => (StatusCode::NOT_FOUND, "missing_session"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Provider(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        // Never leak internals to the client; the full error goes to the log.
        let message = match &self {
            AppError::Provider(err) => {
                tracing::warn!("provider call failed: {err:#}");
                "provider request failed".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("internal error: {msg}");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(serde_json::json!({
            "error": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}
