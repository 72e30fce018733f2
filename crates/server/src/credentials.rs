//! Effective-credential resolution.
//!
//! Every provider-facing request funnels through [`CredentialResolver`]: an
//! owner uses its own credentials, a guest borrows the host's via the
//! session row. Resolution is read-only and runs on every request, so a host
//! clearing their token is observed by the very next guest call.

use crate::auth::{Identity, Principal};
use crate::db::Database;
use crate::error::AppError;

pub const WATCH_REGION_KEY: &str = "watch_region";

/// What the rest of the system uses to talk to the media provider on behalf
/// of a principal.
#[derive(Debug, Clone)]
pub struct EffectiveCredentials {
    pub access_token: Option<String>,
    pub device_id: Option<String>,
    /// The principal the provider sees (the host's id for guests).
    pub principal_id: String,
    pub provider_identity: Option<String>,
    pub provider_config: Option<String>,
    pub watch_region: String,
}

#[derive(Clone)]
pub struct CredentialResolver {
    db: Database,
    require_provider_auth: bool,
    default_watch_region: String,
}

impl CredentialResolver {
    pub fn new(db: Database, require_provider_auth: bool, default_watch_region: String) -> Self {
        Self {
            db,
            require_provider_auth,
            default_watch_region,
        }
    }

    pub async fn resolve(
        &self,
        principal: &Principal,
        claimed_session_code: Option<&str>,
    ) -> Result<EffectiveCredentials, AppError> {
        let watch_region = self.watch_region_for(&principal.id).await?;

        match &principal.identity {
            Identity::Owner(credentials) => {
                // An owner claiming a session code must actually have one.
                if let Some(code) = claimed_session_code {
                    if self.db.get_session(code).await?.is_none() {
                        return Err(AppError::MissingSession(code.to_string()));
                    }
                }

                if self.require_provider_auth && credentials.is_none() {
                    return Err(AppError::Unauthenticated(
                        "No provider credentials on principal".to_string(),
                    ));
                }

                let creds = credentials.clone();
                Ok(EffectiveCredentials {
                    access_token: creds.as_ref().map(|c| c.access_token.clone()),
                    device_id: creds.as_ref().map(|c| c.device_id.clone()),
                    principal_id: principal.id.clone(),
                    provider_identity: creds.as_ref().map(|c| c.provider_identity.clone()),
                    provider_config: creds.and_then(|c| c.provider_config),
                    watch_region,
                })
            }
            Identity::Guest { host_session_code } => {
                let session = self
                    .db
                    .get_session(host_session_code)
                    .await?
                    .ok_or_else(|| AppError::SessionNotFound(host_session_code.clone()))?;

                // The host can revoke lending at any moment by clearing the
                // token fields; guests must observe it immediately.
                if self.require_provider_auth && !session.lending_enabled() {
                    return Err(AppError::GuestAccessRevoked);
                }

                Ok(EffectiveCredentials {
                    access_token: session.host_access_token,
                    device_id: session.host_device_id,
                    principal_id: session.host_principal_id,
                    provider_identity: session.host_provider_identity,
                    provider_config: session.provider_config,
                    watch_region,
                })
            }
        }
    }

    /// Per-principal watch region from the generic settings store. A
    /// malformed stored value counts as absent; it must never fail the
    /// whole resolution.
    async fn watch_region_for(&self, principal_id: &str) -> Result<String, AppError> {
        let stored = self.db.get_setting(principal_id, WATCH_REGION_KEY).await?;
        let region = stored
            .as_deref()
            .and_then(|raw| serde_json::from_str::<String>(raw).ok())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| self.default_watch_region.clone());
        Ok(region)
    }
}
