use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{Identity, Principal};
use crate::error::AppError;
use crate::state::AppState;

mod auth;
mod health;
mod media;
mod sessions;
mod settings;
mod stream;
mod swipe;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Auth
        .route("/auth/token", post(auth::issue_token))
        // Sessions
        .route("/sessions", post(sessions::create_session))
        .route("/sessions/:code", get(sessions::session_info))
        .route("/sessions/:code", delete(sessions::delete_session))
        .route("/sessions/:code/join", post(sessions::join_session))
        .route("/sessions/:code/guest", post(sessions::guest_join))
        .route("/sessions/:code/revoke", post(sessions::revoke_lending))
        .route("/session/members", get(sessions::members))
        .route("/session/filters", put(sessions::update_filters))
        // Swiping
        .route("/swipe", post(swipe::swipe))
        .route("/matches", get(swipe::matches))
        // Live updates
        .route("/events", get(stream::poll_events))
        .route("/events/stream", get(stream::stream_events))
        // Provider passthrough
        .route("/media/libraries", get(media::libraries))
        .route("/media/genres", get(media::genres))
        .route("/media/:item_id", get(media::item_details))
        // Per-user settings
        .route("/settings/:key", get(settings::get_setting))
        .route("/settings/:key", put(settings::put_setting))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// The session the caller is acting in: guests carry it in their identity,
/// owners are looked up through their membership (at most one concurrent
/// session per principal).
pub(crate) async fn active_session_code(
    state: &AppState,
    principal: &Principal,
) -> Result<Option<String>, AppError> {
    match &principal.identity {
        Identity::Guest { host_session_code } => Ok(Some(host_session_code.clone())),
        Identity::Owner(_) => Ok(state.db.get_member_session(&principal.id).await?),
    }
}
