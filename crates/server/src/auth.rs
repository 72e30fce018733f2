//! Principal model and token handling.
//!
//! The upstream identity provider is out of scope; the token endpoint is the
//! trusted boundary where a principal (id + display name, plus provider
//! credentials for owners) enters the system. Guests never carry credentials
//! of their own — they name the session whose host they act through.

use axum::{extract::FromRequestParts, http::header, http::request::Parts};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::ProviderCredentials;
use uuid::Uuid;

use crate::{config::AuthConfig, error::AppError, state::AppState};

/// Where a principal's provider credentials come from.
#[derive(Debug, Clone)]
pub enum Identity {
    /// An ordinary principal with its own credentials (absent only when the
    /// deployment does not require provider auth).
    Owner(Option<ProviderCredentials>),
    /// A guest acting through the named session's host.
    Guest { host_session_code: String },
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub id: String,
    pub display_name: String,
    pub identity: Identity,
}

impl Principal {
    pub fn is_guest(&self) -> bool {
        matches!(self.identity, Identity::Guest { .. })
    }

    /// Guest principal ids are minted fresh at join and carry a prefix so
    /// they can never collide with upstream ids.
    pub fn mint_guest_id() -> String {
        format!("guest:{}", Uuid::new_v4())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub exp: usize,
    #[serde(default)]
    pub guest: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<ProviderCredentials>,
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        let identity = if claims.guest {
            Identity::Guest {
                // Guest tokens are only minted with a session; an empty code
                // fails resolution later as a missing session.
                host_session_code: claims.host_session.unwrap_or_default(),
            }
        } else {
            Identity::Owner(claims.credentials)
        };
        Principal {
            id: claims.sub,
            display_name: claims.name,
            identity,
        }
    }
}

pub fn mint_token(principal: &Principal, auth_config: &AuthConfig) -> Result<String, AppError> {
    let expiration = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::hours(auth_config.token_expiry_hours as i64))
        .ok_or_else(|| AppError::Internal("Failed to calculate expiration".to_string()))?
        .timestamp() as usize;

    let (guest, host_session, credentials) = match &principal.identity {
        Identity::Owner(creds) => (false, None, creds.clone()),
        Identity::Guest { host_session_code } => (true, Some(host_session_code.clone()), None),
    };

    let claims = Claims {
        sub: principal.id.clone(),
        name: principal.display_name.clone(),
        exp: expiration,
        guest,
        host_session,
        credentials,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(auth_config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(e.to_string()))
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthenticated("Invalid or expired token".to_string()))
}

#[async_trait::async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or_else(|| {
                AppError::Unauthenticated("Missing or invalid Authorization header".to_string())
            })?;

        let claims = verify_token(token, &state.config.auth.jwt_secret)?;
        Ok(Principal::from(claims))
    }
}
