use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub code: String,
    pub host_principal_id: String,
    /// Cleared (with the device id) to revoke guest lending without
    /// deleting the session.
    pub host_access_token: Option<String>,
    pub host_device_id: Option<String>,
    pub host_provider_identity: Option<String>,
    pub provider: String,
    pub provider_config: Option<String>,
    pub match_strategy: String,
    pub created_at: Option<String>,
}

impl Session {
    pub fn lending_enabled(&self) -> bool {
        self.host_access_token
            .as_deref()
            .is_some_and(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionMember {
    pub session_code: String,
    pub principal_id: String,
    pub display_name: String,
    pub filters: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Like {
    pub principal_id: String,
    pub item_id: String,
    /// None = solo scope, distinct from every session scope.
    pub session_code: Option<String>,
    pub is_match: bool,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionEventRow {
    pub id: i64,
    pub session_code: String,
    pub event_type: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct MatchedItemRow {
    pub item_id: String,
    pub matched_at: Option<String>,
}
