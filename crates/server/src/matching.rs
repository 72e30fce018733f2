//! Swipe recording and match detection.
//!
//! Per (item, session scope) each principal moves through
//! Unseen → Hidden (reject, terminal) or Unseen → Liked → Matched. Rejects
//! are global per principal; likes are scoped to the session they were made
//! in (or to the solo scope). Duplicate swipes land on the uniqueness
//! constraint and are absorbed as a normal non-match success.
//!
//! Concurrency control is the uniqueness constraint alone: two principals
//! racing on the same item can both miss the other's like and end up
//! unmatched. Accepted trade-off; see the tests.

use shared::{event_type, MatchStrategy, SwipeDirection};
use std::sync::Arc;

use crate::db::Database;
use crate::error::AppError;
use crate::events::EventBus;

#[derive(Debug, Clone, Copy)]
pub struct SwipeOutcome {
    pub is_match: bool,
}

pub struct MatchEngine {
    db: Database,
    bus: Arc<EventBus>,
}

impl MatchEngine {
    pub fn new(db: Database, bus: Arc<EventBus>) -> Self {
        Self { db, bus }
    }

    pub async fn record_swipe(
        &self,
        principal_id: &str,
        session_code: Option<&str>,
        item_id: &str,
        direction: SwipeDirection,
    ) -> Result<SwipeOutcome, AppError> {
        match direction {
            SwipeDirection::Left => {
                // A reject is a global do-not-show-again and terminal: it
                // supersedes any like state the principal had on the item,
                // in every scope. A match the other liker already got keeps
                // their row.
                self.db.delete_likes_for_item(principal_id, item_id).await?;
                self.db.insert_hidden(principal_id, item_id).await?;
                Ok(SwipeOutcome { is_match: false })
            }
            SwipeDirection::Right => {
                // Hidden being terminal, a like on a hidden item is absorbed
                // the same way a duplicate is.
                if self.db.is_hidden(principal_id, item_id).await? {
                    return Ok(SwipeOutcome { is_match: false });
                }
                match session_code {
                    Some(code) => self.record_like_in_session(principal_id, code, item_id).await,
                    None => {
                        // Solo likes can never match anyone.
                        self.db.insert_like(principal_id, item_id, None, false).await?;
                        Ok(SwipeOutcome { is_match: false })
                    }
                }
            }
        }
    }

    async fn record_like_in_session(
        &self,
        principal_id: &str,
        code: &str,
        item_id: &str,
    ) -> Result<SwipeOutcome, AppError> {
        let session = self
            .db
            .get_session(code)
            .await?
            .ok_or_else(|| AppError::SessionNotFound(code.to_string()))?;
        let strategy =
            MatchStrategy::parse(&session.match_strategy).unwrap_or_default();

        match strategy {
            MatchStrategy::FirstTwo => {
                self.record_like_first_two(principal_id, code, item_id).await
            }
            MatchStrategy::Everyone => {
                self.record_like_everyone(principal_id, code, item_id).await
            }
        }
    }

    /// First-two strategy: any existing like by a different principal makes
    /// this one a match. Later likers join the match without a new event.
    async fn record_like_first_two(
        &self,
        principal_id: &str,
        code: &str,
        item_id: &str,
    ) -> Result<SwipeOutcome, AppError> {
        let other = self.db.find_other_like(item_id, code, principal_id).await?;

        match other {
            Some(other) => {
                let inserted = self
                    .db
                    .insert_like(principal_id, item_id, Some(code), true)
                    .await?;
                if !inserted {
                    // Duplicate swipe: already applied, report non-match.
                    return Ok(SwipeOutcome { is_match: false });
                }

                // Flip the existing side (idempotent). Only the flip that
                // creates the match announces it; a third liker joining an
                // existing match stays quiet.
                if !other.is_match {
                    self.db.mark_item_matched(item_id, code).await?;
                    self.publish_match(code, item_id);
                }
                Ok(SwipeOutcome { is_match: true })
            }
            None => {
                self.db
                    .insert_like(principal_id, item_id, Some(code), false)
                    .await?;
                Ok(SwipeOutcome { is_match: false })
            }
        }
    }

    /// Everyone strategy: the item matches only once every current member
    /// has liked it (and the session has at least two members).
    async fn record_like_everyone(
        &self,
        principal_id: &str,
        code: &str,
        item_id: &str,
    ) -> Result<SwipeOutcome, AppError> {
        let inserted = self
            .db
            .insert_like(principal_id, item_id, Some(code), false)
            .await?;
        if !inserted {
            return Ok(SwipeOutcome { is_match: false });
        }

        let members = self.db.count_members(code).await?;
        let likers = self.db.count_distinct_likers(item_id, code).await?;
        if members >= 2 && likers >= members {
            self.db.mark_item_matched(item_id, code).await?;
            self.publish_match(code, item_id);
            return Ok(SwipeOutcome { is_match: true });
        }
        Ok(SwipeOutcome { is_match: false })
    }

    fn publish_match(&self, code: &str, item_id: &str) {
        self.bus.publish(
            event_type::MATCH,
            serde_json::json!({ "sessionCode": code, "itemId": item_id }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Session, SessionMember};
    use tokio::time::{timeout, Duration};

    async fn engine_with_session(code: &str, strategy: &str) -> (MatchEngine, Database) {
        let db = Database::new_in_memory().await.unwrap();
        let bus = Arc::new(EventBus::new(db.clone()));
        db.create_session(&Session {
            code: code.to_string(),
            host_principal_id: "host".to_string(),
            host_access_token: Some("tok".to_string()),
            host_device_id: Some("dev".to_string()),
            host_provider_identity: None,
            provider: "plex".to_string(),
            provider_config: None,
            match_strategy: strategy.to_string(),
            created_at: None,
        })
        .await
        .unwrap();
        (MatchEngine::new(db.clone(), bus), db)
    }

    async fn add_member(db: &Database, code: &str, principal: &str) {
        db.upsert_member(&SessionMember {
            session_code: code.to_string(),
            principal_id: principal.to_string(),
            display_name: principal.to_string(),
            filters: None,
            created_at: None,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_mutual_like_matches_both_rows() {
        let (engine, db) = engine_with_session("ABCD", "first-two").await;

        let first = engine
            .record_swipe("alice", Some("ABCD"), "mv-1", SwipeDirection::Right)
            .await
            .unwrap();
        assert!(!first.is_match);

        let second = engine
            .record_swipe("bob", Some("ABCD"), "mv-1", SwipeDirection::Right)
            .await
            .unwrap();
        assert!(second.is_match);

        // Both rows end matched, regardless of who swiped first.
        for who in ["alice", "bob"] {
            let like = db.get_like(who, "mv-1", Some("ABCD")).await.unwrap().unwrap();
            assert!(like.is_match, "{who}'s like should be matched");
        }
    }

    #[tokio::test]
    async fn test_duplicate_swipe_is_idempotent() {
        let (engine, db) = engine_with_session("ABCD", "first-two").await;

        engine
            .record_swipe("alice", Some("ABCD"), "mv-1", SwipeDirection::Right)
            .await
            .unwrap();
        let repeat = engine
            .record_swipe("alice", Some("ABCD"), "mv-1", SwipeDirection::Right)
            .await
            .unwrap();
        assert!(!repeat.is_match);

        assert_eq!(db.count_distinct_likers("mv-1", "ABCD").await.unwrap(), 1);

        // Duplicate rejects are absorbed the same way.
        engine
            .record_swipe("alice", None, "mv-2", SwipeDirection::Left)
            .await
            .unwrap();
        engine
            .record_swipe("alice", None, "mv-2", SwipeDirection::Left)
            .await
            .unwrap();
        assert!(db.is_hidden("alice", "mv-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_reject_supersedes_earlier_like() {
        let (engine, db) = engine_with_session("ABCD", "first-two").await;

        engine.record_swipe("alice", Some("ABCD"), "mv-1", SwipeDirection::Right).await.unwrap();
        engine.record_swipe("alice", None, "mv-1", SwipeDirection::Right).await.unwrap();
        engine.record_swipe("alice", Some("ABCD"), "mv-1", SwipeDirection::Left).await.unwrap();

        // Exactly one state per (principal, scope): hidden, nothing liked.
        assert!(db.is_hidden("alice", "mv-1").await.unwrap());
        assert!(db.get_like("alice", "mv-1", Some("ABCD")).await.unwrap().is_none());
        assert!(db.get_like("alice", "mv-1", None).await.unwrap().is_none());

        // The dropped like no longer pairs with anyone.
        let bob = engine
            .record_swipe("bob", Some("ABCD"), "mv-1", SwipeDirection::Right)
            .await
            .unwrap();
        assert!(!bob.is_match);
    }

    #[tokio::test]
    async fn test_like_on_hidden_item_is_absorbed() {
        let (engine, db) = engine_with_session("ABCD", "first-two").await;

        engine.record_swipe("alice", Some("ABCD"), "mv-1", SwipeDirection::Left).await.unwrap();
        let outcome = engine
            .record_swipe("alice", Some("ABCD"), "mv-1", SwipeDirection::Right)
            .await
            .unwrap();

        assert!(!outcome.is_match);
        assert!(db.is_hidden("alice", "mv-1").await.unwrap());
        assert!(db.get_like("alice", "mv-1", Some("ABCD")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_after_match_does_not_unflip() {
        let (engine, db) = engine_with_session("ABCD", "first-two").await;

        engine.record_swipe("alice", Some("ABCD"), "mv-1", SwipeDirection::Right).await.unwrap();
        engine.record_swipe("bob", Some("ABCD"), "mv-1", SwipeDirection::Right).await.unwrap();

        let repeat = engine
            .record_swipe("bob", Some("ABCD"), "mv-1", SwipeDirection::Right)
            .await
            .unwrap();
        assert!(!repeat.is_match);

        let like = db.get_like("bob", "mv-1", Some("ABCD")).await.unwrap().unwrap();
        assert!(like.is_match);
    }

    #[tokio::test]
    async fn test_likes_are_session_scoped_rejects_are_global() {
        let (engine, db) = engine_with_session("S1S1", "first-two").await;
        db.create_session(&Session {
            code: "S2S2".to_string(),
            host_principal_id: "host".to_string(),
            host_access_token: Some("tok".to_string()),
            host_device_id: None,
            host_provider_identity: None,
            provider: "plex".to_string(),
            provider_config: None,
            match_strategy: "first-two".to_string(),
            created_at: None,
        })
        .await
        .unwrap();

        // A like in S1 must not cause a match in S2.
        engine.record_swipe("alice", Some("S1S1"), "mv-1", SwipeDirection::Right).await.unwrap();
        let in_other = engine
            .record_swipe("bob", Some("S2S2"), "mv-1", SwipeDirection::Right)
            .await
            .unwrap();
        assert!(!in_other.is_match);

        // A reject is visible everywhere for that principal.
        engine.record_swipe("alice", Some("S1S1"), "mv-3", SwipeDirection::Left).await.unwrap();
        assert!(db.is_hidden("alice", "mv-3").await.unwrap());
    }

    /// The host's earlier solo like on an item must be invisible inside the
    /// session scope.
    #[tokio::test]
    async fn test_solo_like_does_not_leak_into_session() {
        let (engine, db) = engine_with_session("ABCD", "first-two").await;

        // Host liked mv-1 solo, before the session existed.
        engine.record_swipe("host", None, "mv-1", SwipeDirection::Right).await.unwrap();

        // Guest likes it inside the session: no match partner yet.
        let guest = engine
            .record_swipe("guest:g1", Some("ABCD"), "mv-1", SwipeDirection::Right)
            .await
            .unwrap();
        assert!(!guest.is_match);

        // Host liking it *inside* the session pairs with the guest.
        let host = engine
            .record_swipe("host", Some("ABCD"), "mv-1", SwipeDirection::Right)
            .await
            .unwrap();
        assert!(host.is_match);

        // The solo row never flipped.
        let solo = db.get_like("host", "mv-1", None).await.unwrap().unwrap();
        assert!(!solo.is_match);
    }

    #[tokio::test]
    async fn test_third_liker_joins_match_without_new_event() {
        let (_engine, db) = engine_with_session("ABCD", "first-two").await;
        let bus = Arc::new(EventBus::new(db.clone()));
        let engine = MatchEngine::new(db.clone(), Arc::clone(&bus));
        let mut sub = bus.subscribe("ABCD");

        engine.record_swipe("alice", Some("ABCD"), "mv-1", SwipeDirection::Right).await.unwrap();
        engine.record_swipe("bob", Some("ABCD"), "mv-1", SwipeDirection::Right).await.unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.event_type, event_type::MATCH);
        assert_eq!(event.payload["itemId"], "mv-1");

        let third = engine
            .record_swipe("carol", Some("ABCD"), "mv-1", SwipeDirection::Right)
            .await
            .unwrap();
        assert!(third.is_match);
        let carol = db.get_like("carol", "mv-1", Some("ABCD")).await.unwrap().unwrap();
        assert!(carol.is_match);

        // No second match announcement for the same item.
        assert!(timeout(Duration::from_millis(100), sub.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_everyone_strategy_waits_for_all_members() {
        let (engine, db) = engine_with_session("ABCD", "everyone").await;
        for who in ["alice", "bob", "carol"] {
            add_member(&db, "ABCD", who).await;
        }

        engine.record_swipe("alice", Some("ABCD"), "mv-1", SwipeDirection::Right).await.unwrap();
        let two_of_three = engine
            .record_swipe("bob", Some("ABCD"), "mv-1", SwipeDirection::Right)
            .await
            .unwrap();
        assert!(!two_of_three.is_match);

        let all = engine
            .record_swipe("carol", Some("ABCD"), "mv-1", SwipeDirection::Right)
            .await
            .unwrap();
        assert!(all.is_match);

        for who in ["alice", "bob", "carol"] {
            let like = db.get_like(who, "mv-1", Some("ABCD")).await.unwrap().unwrap();
            assert!(like.is_match);
        }
    }

    #[tokio::test]
    async fn test_matched_items_deduplicated_newest_first() {
        let (engine, db) = engine_with_session("ABCD", "first-two").await;

        engine.record_swipe("alice", Some("ABCD"), "mv-1", SwipeDirection::Right).await.unwrap();
        engine.record_swipe("bob", Some("ABCD"), "mv-1", SwipeDirection::Right).await.unwrap();
        engine.record_swipe("alice", Some("ABCD"), "mv-2", SwipeDirection::Right).await.unwrap();

        let matched = db.get_matched_items("ABCD").await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].item_id, "mv-1");
    }

    /// The documented race: both likers read before either write lands,
    /// producing two unmatched likes. Reproduced here by writing both rows
    /// the way the racing inserts would.
    #[tokio::test]
    async fn test_race_leaves_two_unmatched_likes() {
        let (_engine, db) = engine_with_session("ABCD", "first-two").await;

        assert!(db.insert_like("alice", "mv-1", Some("ABCD"), false).await.unwrap());
        assert!(db.insert_like("bob", "mv-1", Some("ABCD"), false).await.unwrap());

        for who in ["alice", "bob"] {
            let like = db.get_like(who, "mv-1", Some("ABCD")).await.unwrap().unwrap();
            assert!(!like.is_match);
        }
    }

    #[tokio::test]
    async fn test_swipe_in_unknown_session_fails() {
        let (engine, _db) = engine_with_session("ABCD", "first-two").await;
        let err = engine
            .record_swipe("alice", Some("ZZZZ"), "mv-1", SwipeDirection::Right)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionNotFound(_)));
    }
}
