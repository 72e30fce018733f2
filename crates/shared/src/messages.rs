use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Event bus wire types
// ============================================================================

/// Reserved routing code that fans an event out to every connected client,
/// regardless of which session they are in. Generated session codes are
/// always four characters, so this can never collide with a real session.
pub const GLOBAL_CODE: &str = "ALL";

/// Event type tags carried in the `type` field of the durable log and the
/// SSE wire. Kept as plain strings so old clients ignore tags they don't
/// know about.
pub mod event_type {
    /// Two members of a session liked the same item.
    pub const MATCH: &str = "match";
    /// Session membership or settings changed; clients should refetch.
    pub const SESSION_UPDATE: &str = "session_update";
    /// The host deleted the session.
    pub const SESSION_DELETED: &str = "session_deleted";
    /// The host revoked credential lending; guests lose provider access.
    pub const LENDING_REVOKED: &str = "lending_revoked";
}

/// Normalized event shape used by both delivery paths (in-process fan-out
/// and the durable log) and by the SSE stream to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub session_code: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// What producers hand to the bus. Historically some call sites published a
/// bare session code to mean "this session's membership changed", others a
/// structured object carrying a `sessionCode` field; the bus accepts both
/// and normalizes into an [`EventEnvelope`] exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PublishPayload {
    Code(String),
    Structured(serde_json::Value),
}

impl PublishPayload {
    /// Extract the routing key (session code) carried by the payload.
    pub fn routing_key(&self) -> Option<&str> {
        match self {
            PublishPayload::Code(code) => Some(code.as_str()),
            PublishPayload::Structured(value) => {
                value.get("sessionCode").and_then(|v| v.as_str())
            }
        }
    }

    /// The body that ends up in the envelope. A bare code becomes an object
    /// carrying just the session code, so consumers see one shape.
    pub fn into_body(self) -> serde_json::Value {
        match self {
            PublishPayload::Code(code) => serde_json::json!({ "sessionCode": code }),
            PublishPayload::Structured(value) => value,
        }
    }
}

impl From<&str> for PublishPayload {
    fn from(code: &str) -> Self {
        PublishPayload::Code(code.to_string())
    }
}

impl From<serde_json::Value> for PublishPayload {
    fn from(value: serde_json::Value) -> Self {
        PublishPayload::Structured(value)
    }
}

// ============================================================================
// Session types
// ============================================================================

/// How a session decides when likes become a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MatchStrategy {
    /// The first two distinct members who like an item match; later likers
    /// join the existing match.
    #[default]
    #[serde(rename = "first-two")]
    FirstTwo,
    /// An item only matches once every current member has liked it.
    #[serde(rename = "everyone")]
    Everyone,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::FirstTwo => "first-two",
            MatchStrategy::Everyone => "everyone",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "first-two" => Some(MatchStrategy::FirstTwo),
            "everyone" => Some(MatchStrategy::Everyone),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub code: String,
    pub host_principal_id: String,
    pub provider: String,
    pub match_strategy: MatchStrategy,
    /// Whether the host currently lends credentials to guests.
    pub lending_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub principal_id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<serde_json::Value>,
}

// ============================================================================
// Request / response DTOs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeDirection {
    /// Reject: hide the item everywhere for this principal.
    Left,
    /// Accept: like the item within the current session scope.
    Right,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwipeRequest {
    pub item_id: String,
    pub direction: SwipeDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwipeResponse {
    pub success: bool,
    pub is_match: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedItem {
    pub item_id: String,
    pub matched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_strategy: Option<MatchStrategy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreatedResponse {
    pub code: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestJoinRequest {
    pub display_name: String,
}

/// Provider credentials as produced by the upstream auth layer for an
/// ordinary (non-guest) principal. `provider_config` is kept serialized;
/// the core never interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    pub access_token: String,
    pub device_id: String,
    pub provider_identity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub principal_id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<ProviderCredentials>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    pub principal_id: String,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_payload_bare_code() {
        let payload: PublishPayload = serde_json::from_str("\"WXYZ\"").unwrap();
        assert_eq!(payload.routing_key(), Some("WXYZ"));
        assert_eq!(
            payload.into_body(),
            serde_json::json!({ "sessionCode": "WXYZ" })
        );
    }

    #[test]
    fn test_publish_payload_structured() {
        let raw = serde_json::json!({ "sessionCode": "ABCD", "itemId": "mv-1" });
        let payload: PublishPayload = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(payload.routing_key(), Some("ABCD"));
        assert_eq!(payload.into_body(), raw);
    }

    #[test]
    fn test_publish_payload_missing_routing_key() {
        let payload = PublishPayload::Structured(serde_json::json!({ "itemId": "mv-1" }));
        assert_eq!(payload.routing_key(), None);
    }

    #[test]
    fn test_event_envelope_wire_shape() {
        let envelope = EventEnvelope {
            session_code: "ABCD".to_string(),
            event_type: event_type::MATCH.to_string(),
            payload: serde_json::json!({ "itemId": "mv-1" }),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"sessionCode\":\"ABCD\""));
        assert!(json.contains("\"type\":\"match\""));
        assert!(json.contains("\"createdAt\""));
    }

    #[test]
    fn test_swipe_request_wire_names() {
        let req: SwipeRequest =
            serde_json::from_str(r#"{"itemId":"mv-9","direction":"right"}"#).unwrap();
        assert_eq!(req.item_id, "mv-9");
        assert_eq!(req.direction, SwipeDirection::Right);

        let resp = SwipeResponse { success: true, is_match: false };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"isMatch\":false"));
    }

    #[test]
    fn test_match_strategy_round_trip() {
        assert_eq!(MatchStrategy::parse("first-two"), Some(MatchStrategy::FirstTwo));
        assert_eq!(MatchStrategy::parse("everyone"), Some(MatchStrategy::Everyone));
        assert_eq!(MatchStrategy::parse("most"), None);
        assert_eq!(
            serde_json::to_string(&MatchStrategy::Everyone).unwrap(),
            "\"everyone\""
        );
    }
}
