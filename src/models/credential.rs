use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Hex-encoded SHA-256, the length every credential id has.
pub const CREDENTIAL_ID_LEN: usize = 64;

/// An ephemeral token bound to one session. Consumed records are retained for audit.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Credential {
    pub id: String,
    pub session_id: Uuid,
    pub issued_by: Uuid,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Why a presented credential cannot be used. Ordered by check precedence.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    Unknown,
    Inactive,
    Expired,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InvalidReason::Unknown => "unknown",
            InvalidReason::Inactive => "inactive",
            InvalidReason::Expired => "expired",
        };
        f.write_str(text)
    }
}

/// Result of a read-only credential check.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, JsonSchema)]
pub struct CredentialValidation {
    pub credential_id: String,
    pub session_id: Option<Uuid>,
    pub valid: bool,
    pub reason: Option<InvalidReason>,
}

impl CredentialValidation {
    pub fn valid(credential: &Credential) -> Self {
        Self {
            credential_id: credential.id.clone(),
            session_id: Some(credential.session_id),
            valid: true,
            reason: None,
        }
    }

    pub fn invalid(credential_id: &str, session_id: Option<Uuid>, reason: InvalidReason) -> Self {
        Self {
            credential_id: credential_id.to_string(),
            session_id,
            valid: false,
            reason: Some(reason),
        }
    }
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct IssueCredentialRequest {
    /// Configured bounds apply on top; one day is the hard ceiling.
    #[validate(range(min = 1, max = 1440))]
    pub ttl_minutes: i64,
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct CredentialResponse {
    pub id: String,
    pub session_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// `data:image/svg+xml;base64,...` QR image encoding the credential id.
    pub qr_code: String,
}

impl CredentialResponse {
    pub fn new(credential: &Credential, qr_code: String) -> Self {
        CredentialResponse {
            id: credential.id.clone(),
            session_id: credential.session_id,
            issued_at: credential.issued_at,
            expires_at: credential.expires_at,
            qr_code,
        }
    }
}
