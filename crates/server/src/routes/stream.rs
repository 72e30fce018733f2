//! Live-update delivery to clients.
//!
//! Two consumer surfaces over the same bus:
//!
//! - `GET /events?since=` — plain polling of the durable log; the only path
//!   that observes events published by other instances.
//! - `GET /events/stream` — SSE. Forwards the in-process subscription (zero
//!   latency for events from this instance) and interleaves durable-log
//!   polls for cross-instance events. A client can see an event on both
//!   paths; delivery is at-least-once by design, never exactly-once.
//!
//! The in-process listener is deregistered when the client goes away: the
//! SSE stream drops, the channel closes, the forwarding task exits and drops
//! its subscription guard.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Deserialize;
use shared::{EventEnvelope, GLOBAL_CODE};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::auth::Principal;
use crate::error::AppError;
use crate::events::EventBus;
use crate::routes::active_session_code;
use crate::state::AppState;

const DURABLE_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub since: Option<DateTime<Utc>>,
}

/// GET /events — durable-log polling for the caller's session.
pub async fn poll_events(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<EventsQuery>,
) -> Result<axum::Json<Vec<EventEnvelope>>, AppError> {
    let code = active_session_code(&state, &principal)
        .await?
        .unwrap_or_else(|| GLOBAL_CODE.to_string());
    let since = query.since.unwrap_or_else(Utc::now);
    let events = state.bus.poll_since(&code, since).await?;
    Ok(axum::Json(events))
}

/// GET /events/stream — SSE live updates for the caller's session.
pub async fn stream_events(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let code = active_session_code(&state, &principal)
        .await?
        .unwrap_or_else(|| GLOBAL_CODE.to_string());
    let since = query.since.unwrap_or_else(Utc::now);

    let (tx, rx) = mpsc::channel::<EventEnvelope>(64);
    tokio::spawn(forward_events(Arc::clone(&state.bus), code, since, tx));

    let stream = ReceiverStream::new(rx).filter_map(|envelope| {
        let data = serde_json::to_string(&envelope).ok()?;
        Some(Ok(Event::default().event(envelope.event_type).data(data)))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Pump both delivery paths into one channel until the client disconnects.
async fn forward_events(
    bus: Arc<EventBus>,
    code: String,
    mut cursor: DateTime<Utc>,
    tx: mpsc::Sender<EventEnvelope>,
) {
    let mut subscription = bus.subscribe(&code);
    let mut poll = tokio::time::interval(DURABLE_POLL_INTERVAL);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            local = subscription.recv() => {
                match local {
                    Some(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = poll.tick() => {
                let events = match bus.poll_since(&code, cursor).await {
                    Ok(events) => events,
                    Err(err) => {
                        tracing::warn!("durable event poll failed: {err}");
                        continue;
                    }
                };
                for envelope in events {
                    cursor = cursor.max(envelope.created_at);
                    if tx.send(envelope).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
