//! Dual-path event distribution.
//!
//! Every publish fans out twice, independently:
//!
//! 1. **In-process**: synchronous delivery to listeners registered in this
//!    process (zero latency on single-instance deployments).
//! 2. **Durable**: the event is appended to the `session_events` log from a
//!    detached task; other instances observe it by polling. Append failures
//!    are logged and swallowed — losing a notification is tolerable, failing
//!    the operation that triggered it is not.
//!
//! A retention sweep runs after every publish (also detached) and deletes
//! log rows older than five minutes, so the log stays bounded without a
//! scheduled job.

use chrono::{Duration, Utc};
use dashmap::DashMap;
use shared::{EventEnvelope, PublishPayload, GLOBAL_CODE};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::db::Database;
use crate::error::AppError;

/// How long durable event rows are kept.
pub const RETENTION_SECONDS: i64 = 300;

/// Per-listener channel capacity. A listener that falls this far behind has
/// its events dropped rather than blocking the publisher.
const LISTENER_BUFFER: usize = 64;

struct Listener {
    session_code: String,
    sender: mpsc::Sender<EventEnvelope>,
}

/// Process-scoped bus. Created once at startup; listeners register and
/// deregister themselves over the process lifetime.
pub struct EventBus {
    db: Database,
    listeners: Arc<DashMap<Uuid, Listener>>,
}

impl EventBus {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            listeners: Arc::new(DashMap::new()),
        }
    }

    /// Publish an event. Fire-and-forget: in-process delivery happens before
    /// this returns, the durable append and the retention sweep are spawned
    /// and never awaited.
    pub fn publish(&self, event_type: &str, payload: impl Into<PublishPayload>) {
        let payload = payload.into();
        let session_code = payload
            .routing_key()
            .unwrap_or(GLOBAL_CODE)
            .to_string();
        let envelope = EventEnvelope {
            session_code,
            event_type: event_type.to_string(),
            payload: payload.into_body(),
            created_at: Utc::now(),
        };

        self.deliver_local(&envelope);
        self.append_durable(envelope);
        self.sweep();
    }

    /// Synchronous in-process fan-out to listeners on the event's session or
    /// on the global code.
    fn deliver_local(&self, envelope: &EventEnvelope) {
        for entry in self.listeners.iter() {
            let listener = entry.value();
            if listener.session_code != envelope.session_code
                && envelope.session_code != GLOBAL_CODE
            {
                continue;
            }
            if listener.sender.try_send(envelope.clone()).is_err() {
                tracing::warn!(
                    session = %envelope.session_code,
                    "dropping event for slow or gone in-process listener"
                );
            }
        }
    }

    /// Detached durable append. Failure is logged, never propagated — the
    /// triggering operation already succeeded.
    fn append_durable(&self, envelope: EventEnvelope) {
        let db = self.db.clone();
        tokio::spawn(async move {
            let payload = envelope.payload.to_string();
            if let Err(err) = db
                .insert_event(
                    &envelope.session_code,
                    &envelope.event_type,
                    &payload,
                    envelope.created_at,
                )
                .await
            {
                tracing::warn!("failed to persist session event: {err:#}");
            }
        });
    }

    /// Detached best-effort retention sweep.
    fn sweep(&self) {
        let db = self.db.clone();
        tokio::spawn(async move {
            let cutoff = Utc::now() - Duration::seconds(RETENTION_SECONDS);
            match db.delete_events_before(cutoff).await {
                Ok(0) => {}
                Ok(n) => tracing::debug!("swept {n} expired session events"),
                Err(err) => tracing::warn!("event retention sweep failed: {err:#}"),
            }
        });
    }

    /// Register an in-process listener for a session code (or [`GLOBAL_CODE`]).
    /// Dropping the returned subscription deregisters it.
    pub fn subscribe(&self, session_code: &str) -> Subscription {
        let (sender, receiver) = mpsc::channel(LISTENER_BUFFER);
        let id = Uuid::new_v4();
        self.listeners.insert(
            id,
            Listener {
                session_code: session_code.to_string(),
                sender,
            },
        );
        tracing::debug!(%id, session = %session_code, "in-process listener registered");
        Subscription {
            id,
            listeners: Arc::clone(&self.listeners),
            receiver,
        }
    }

    /// Durable-path consumption: events for a session (plus global
    /// broadcasts) strictly newer than the cursor, in creation order.
    pub async fn poll_since(
        &self,
        session_code: &str,
        since: chrono::DateTime<Utc>,
    ) -> Result<Vec<EventEnvelope>, AppError> {
        let rows = self
            .db
            .get_events_since(session_code, GLOBAL_CODE, since)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| EventEnvelope {
                session_code: row.session_code,
                event_type: row.event_type,
                payload: serde_json::from_str(&row.payload)
                    .unwrap_or(serde_json::Value::Null),
                created_at: row.created_at,
            })
            .collect())
    }
}

/// A registered in-process listener. Deregisters itself on drop, when the
/// owning request or connection ends.
pub struct Subscription {
    id: Uuid,
    listeners: Arc<DashMap<Uuid, Listener>>,
    receiver: mpsc::Receiver<EventEnvelope>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.listeners.remove(&self.id);
        tracing::debug!(id = %self.id, "in-process listener deregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::event_type;
    use std::time::Duration as StdDuration;

    async fn bus() -> (EventBus, Database) {
        let db = Database::new_in_memory().await.unwrap();
        (EventBus::new(db.clone()), db)
    }

    #[tokio::test]
    async fn test_in_process_delivery_to_session_listener() {
        let (bus, _db) = bus().await;
        let mut sub = bus.subscribe("ABCD");

        bus.publish(
            event_type::MATCH,
            serde_json::json!({ "sessionCode": "ABCD", "itemId": "mv-1" }),
        );

        let envelope = sub.recv().await.unwrap();
        assert_eq!(envelope.session_code, "ABCD");
        assert_eq!(envelope.event_type, event_type::MATCH);
        assert_eq!(envelope.payload["itemId"], "mv-1");
    }

    #[tokio::test]
    async fn test_listener_only_sees_own_session_plus_global() {
        let (bus, _db) = bus().await;
        let mut sub = bus.subscribe("ABCD");

        bus.publish(event_type::SESSION_UPDATE, "WXYZ");
        bus.publish(event_type::SESSION_UPDATE, GLOBAL_CODE);

        let envelope = sub.recv().await.unwrap();
        assert_eq!(envelope.session_code, GLOBAL_CODE);
    }

    #[tokio::test]
    async fn test_bare_code_payload_normalized() {
        let (bus, _db) = bus().await;
        let mut sub = bus.subscribe("ABCD");

        // Legacy shorthand: a bare session code means "membership changed".
        bus.publish(event_type::SESSION_UPDATE, "ABCD");

        let envelope = sub.recv().await.unwrap();
        assert_eq!(envelope.payload, serde_json::json!({ "sessionCode": "ABCD" }));
    }

    #[tokio::test]
    async fn test_durable_append_and_poll() {
        let (bus, _db) = bus().await;
        let since = Utc::now() - Duration::seconds(1);

        bus.publish(
            event_type::MATCH,
            serde_json::json!({ "sessionCode": "ABCD", "itemId": "mv-2" }),
        );
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let events = bus.poll_since("ABCD", since).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["itemId"], "mv-2");

        // The cursor is strictly-greater: re-polling from the last seen
        // timestamp yields nothing.
        let events = bus.poll_since("ABCD", events[0].created_at).await.unwrap();
        assert!(events.is_empty());

        // Other sessions' pollers never see it.
        let events = bus.poll_since("WXYZ", since).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_publish_survives_durable_failure() {
        let (bus, db) = bus().await;
        db.execute_raw("DROP TABLE session_events").await.unwrap();

        let mut sub = bus.subscribe("ABCD");
        bus.publish(event_type::SESSION_UPDATE, "ABCD");

        // In-process delivery already happened; the durable failure was
        // swallowed in its detached task.
        let envelope = sub.recv().await.unwrap();
        assert_eq!(envelope.session_code, "ABCD");
    }

    #[tokio::test]
    async fn test_sweeper_respects_retention_window() {
        let (bus, db) = bus().await;
        let now = Utc::now();

        db.insert_event("ABCD", "match", "{}", now - Duration::seconds(RETENTION_SECONDS + 60))
            .await
            .unwrap();
        db.insert_event("ABCD", "match", "{}", now).await.unwrap();

        bus.publish(event_type::SESSION_UPDATE, "WXYZ");
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let events = bus
            .poll_since("ABCD", now - Duration::seconds(RETENTION_SECONDS * 2))
            .await
            .unwrap();
        // Expired row gone, fresh row untouched.
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].created_at.timestamp(), now.timestamp());
    }

    #[tokio::test]
    async fn test_dropped_subscription_deregisters() {
        let (bus, _db) = bus().await;
        let sub = bus.subscribe("ABCD");
        assert_eq!(bus.listeners.len(), 1);
        drop(sub);
        assert_eq!(bus.listeners.len(), 0);
    }
}
