//! Session lifecycle and membership.

use rand::Rng;
use shared::{event_type, MatchStrategy};
use std::sync::Arc;

use crate::auth::{Identity, Principal};
use crate::db::{Database, Session, SessionMember};
use crate::error::AppError;
use crate::events::EventBus;

const CODE_LENGTH: usize = 4;
const CODE_ALLOC_ATTEMPTS: usize = 10;

pub struct SessionService {
    db: Database,
    bus: Arc<EventBus>,
    require_provider_auth: bool,
}

impl SessionService {
    pub fn new(db: Database, bus: Arc<EventBus>, require_provider_auth: bool) -> Self {
        Self {
            db,
            bus,
            require_provider_auth,
        }
    }

    /// Start hosting: allocate a fresh code (retrying on the uniqueness
    /// constraint), store the host's credentials on the session, and insert
    /// the host as the first member.
    pub async fn create(
        &self,
        host: &Principal,
        provider: &str,
        provider_config: Option<String>,
        match_strategy: MatchStrategy,
    ) -> Result<Session, AppError> {
        let credentials = match &host.identity {
            Identity::Owner(creds) => creds.clone(),
            Identity::Guest { .. } => {
                return Err(AppError::BadRequest(
                    "Guests cannot host sessions".to_string(),
                ))
            }
        };

        let mut session = Session {
            code: String::new(),
            host_principal_id: host.id.clone(),
            host_access_token: credentials.as_ref().map(|c| c.access_token.clone()),
            host_device_id: credentials.as_ref().map(|c| c.device_id.clone()),
            host_provider_identity: credentials.as_ref().map(|c| c.provider_identity.clone()),
            provider: provider.to_string(),
            provider_config,
            match_strategy: match_strategy.as_str().to_string(),
            created_at: None,
        };

        let mut created = false;
        for _ in 0..CODE_ALLOC_ATTEMPTS {
            session.code = generate_code();
            if self.db.create_session(&session).await? {
                created = true;
                break;
            }
        }
        if !created {
            return Err(AppError::Internal(
                "Could not allocate a unique session code".to_string(),
            ));
        }

        self.enroll(&session.code, &host.id, &host.display_name, None)
            .await?;

        tracing::info!(code = %session.code, host = %host.id, "session created");
        self.bus
            .publish(event_type::SESSION_UPDATE, session.code.as_str());
        Ok(session)
    }

    /// Join an existing session. Membership insert is idempotent; joining a
    /// session you are already in is a no-op.
    pub async fn join(
        &self,
        code: &str,
        principal: &Principal,
        filters: Option<String>,
    ) -> Result<Session, AppError> {
        let session = self
            .db
            .get_session(code)
            .await?
            .ok_or_else(|| AppError::SessionNotFound(code.to_string()))?;

        // Guests ride on the host's credentials, so the host must still be
        // lending them.
        if principal.is_guest() && self.require_provider_auth && !session.lending_enabled() {
            return Err(AppError::GuestAccessRevoked);
        }

        self.enroll(&session.code, &principal.id, &principal.display_name, filters)
            .await?;

        tracing::info!(code = %session.code, principal = %principal.id, "member joined");
        self.bus
            .publish(event_type::SESSION_UPDATE, session.code.as_str());
        Ok(session)
    }

    /// Join as a guest: mints a synthetic principal acting through the
    /// session host. The caller turns it into a token.
    pub async fn guest_join(
        &self,
        code: &str,
        display_name: &str,
    ) -> Result<(Session, Principal), AppError> {
        let guest = Principal {
            id: Principal::mint_guest_id(),
            display_name: display_name.to_string(),
            identity: Identity::Guest {
                host_session_code: code.to_string(),
            },
        };
        let session = self.join(code, &guest, None).await?;
        Ok((session, guest))
    }

    /// Host-only: clear the token fields so every subsequent guest
    /// resolution fails, without deleting the session.
    pub async fn revoke_lending(&self, code: &str, acting: &Principal) -> Result<(), AppError> {
        let session = self.require_host(code, acting).await?;
        self.db.clear_host_token(&session.code).await?;
        tracing::info!(code = %session.code, "host revoked credential lending");
        self.bus
            .publish(event_type::LENDING_REVOKED, session.code.as_str());
        Ok(())
    }

    /// Host-only: delete the session, its membership, and its likes.
    pub async fn delete(&self, code: &str, acting: &Principal) -> Result<(), AppError> {
        let session = self.require_host(code, acting).await?;
        self.db.delete_session(&session.code).await?;
        tracing::info!(code = %session.code, "session deleted");
        self.bus
            .publish(event_type::SESSION_DELETED, session.code.as_str());
        Ok(())
    }

    pub async fn members(&self, code: &str) -> Result<Vec<SessionMember>, AppError> {
        if self.db.get_session(code).await?.is_none() {
            return Err(AppError::SessionNotFound(code.to_string()));
        }
        Ok(self.db.get_members(code).await?)
    }

    /// Insert a membership row, first leaving any other session the
    /// principal was in — a principal is a member of at most one session at
    /// a time. The vacated session's members get notified.
    async fn enroll(
        &self,
        code: &str,
        principal_id: &str,
        display_name: &str,
        filters: Option<String>,
    ) -> Result<(), AppError> {
        if let Some(previous) = self.db.get_member_session(principal_id).await? {
            if previous != code && self.db.remove_member(&previous, principal_id).await? {
                tracing::info!(code = %previous, principal = %principal_id, "member left");
                self.bus
                    .publish(event_type::SESSION_UPDATE, previous.as_str());
            }
        }

        self.db
            .upsert_member(&SessionMember {
                session_code: code.to_string(),
                principal_id: principal_id.to_string(),
                display_name: display_name.to_string(),
                filters,
                created_at: None,
            })
            .await?;
        Ok(())
    }

    async fn require_host(&self, code: &str, acting: &Principal) -> Result<Session, AppError> {
        let session = self
            .db
            .get_session(code)
            .await?
            .ok_or_else(|| AppError::SessionNotFound(code.to_string()))?;
        if session.host_principal_id != acting.id {
            return Err(AppError::BadRequest(
                "Only the session host can do that".to_string(),
            ));
        }
        Ok(session)
    }
}

/// Four uppercase alphanumeric characters. The reserved global code is three
/// characters, so generated codes can never collide with it.
fn generate_code() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(CODE_LENGTH)
        .map(char::from)
        .collect::<String>()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ProviderCredentials;

    fn host(id: &str) -> Principal {
        Principal {
            id: id.to_string(),
            display_name: id.to_string(),
            identity: Identity::Owner(Some(ProviderCredentials {
                access_token: format!("{id}-token"),
                device_id: format!("{id}-device"),
                provider_identity: format!("{id}@provider"),
                provider_config: None,
            })),
        }
    }

    async fn service() -> (SessionService, Database) {
        let db = Database::new_in_memory().await.unwrap();
        let bus = Arc::new(EventBus::new(db.clone()));
        (SessionService::new(db.clone(), bus, true), db)
    }

    #[tokio::test]
    async fn test_create_allocates_code_and_host_membership() {
        let (service, db) = service().await;
        let session = service
            .create(&host("h1"), "plex", None, MatchStrategy::FirstTwo)
            .await
            .unwrap();

        assert_eq!(session.code.len(), CODE_LENGTH);
        assert!(session.code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert_eq!(session.host_access_token.as_deref(), Some("h1-token"));

        let members = db.get_members(&session.code).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].principal_id, "h1");
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let (service, db) = service().await;
        let session = service
            .create(&host("h1"), "plex", None, MatchStrategy::FirstTwo)
            .await
            .unwrap();

        service.join(&session.code, &host("u2"), None).await.unwrap();
        service.join(&session.code, &host("u2"), None).await.unwrap();

        assert_eq!(db.get_members(&session.code).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_joining_new_session_leaves_previous() {
        let (service, db) = service().await;
        let first = service
            .create(&host("h1"), "plex", None, MatchStrategy::FirstTwo)
            .await
            .unwrap();
        let second = service
            .create(&host("h2"), "plex", None, MatchStrategy::FirstTwo)
            .await
            .unwrap();

        service.join(&first.code, &host("u1"), None).await.unwrap();
        service.join(&second.code, &host("u1"), None).await.unwrap();

        // One concurrent session per principal: the old membership is gone.
        let first_members = db.get_members(&first.code).await.unwrap();
        assert!(first_members.iter().all(|m| m.principal_id != "u1"));
        assert_eq!(
            db.get_member_session("u1").await.unwrap().as_deref(),
            Some(second.code.as_str())
        );

        // Rejoining the current session stays idempotent.
        service.join(&second.code, &host("u1"), None).await.unwrap();
        assert_eq!(db.get_members(&second.code).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_join_unknown_code_fails() {
        let (service, _db) = service().await;
        let err = service.join("ZZZZ", &host("u2"), None).await.unwrap_err();
        assert!(matches!(err, AppError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_guest_join_requires_lending() {
        let (service, db) = service().await;
        let session = service
            .create(&host("h1"), "plex", None, MatchStrategy::FirstTwo)
            .await
            .unwrap();

        let (_, guest) = service.guest_join(&session.code, "Visitor").await.unwrap();
        assert!(guest.id.starts_with("guest:"));

        db.clear_host_token(&session.code).await.unwrap();
        let err = service.guest_join(&session.code, "Second").await.unwrap_err();
        assert!(matches!(err, AppError::GuestAccessRevoked));
    }

    #[tokio::test]
    async fn test_only_host_can_revoke_or_delete() {
        let (service, db) = service().await;
        let session = service
            .create(&host("h1"), "plex", None, MatchStrategy::FirstTwo)
            .await
            .unwrap();

        assert!(service.revoke_lending(&session.code, &host("u2")).await.is_err());
        service.revoke_lending(&session.code, &host("h1")).await.unwrap();
        assert!(!db.get_session(&session.code).await.unwrap().unwrap().lending_enabled());

        service.delete(&session.code, &host("h1")).await.unwrap();
        assert!(db.get_session(&session.code).await.unwrap().is_none());
        assert!(db.get_members(&session.code).await.unwrap().is_empty());
    }
}
