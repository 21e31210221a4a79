use crate::audit::record_audit_event;
use crate::clock::Clock;
use crate::config::CredentialConfig;
use crate::database::CheckinStore;
use crate::error::app_error::AppError;
use crate::models::audit::audit_events;
use crate::models::credential::Credential;
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Duration, Utc};
use qrcode::QrCode;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// Fresh nonces drawn before an id collision is reported.
const MAX_ID_ATTEMPTS: usize = 3;

pub struct CredentialIssuer {
    store: Arc<dyn CheckinStore>,
    clock: Arc<dyn Clock>,
    config: CredentialConfig,
}

impl CredentialIssuer {
    pub fn new(store: Arc<dyn CheckinStore>, clock: Arc<dyn Clock>, config: CredentialConfig) -> Self {
        CredentialIssuer { store, clock, config }
    }

    /// Issue a credential for `session_id`.
    ///
    /// Only the session owner may issue. The credential lives for `ttl_minutes` but
    /// never past the session end plus `end_grace_minutes`.
    pub async fn issue(&self, session_id: &Uuid, issuer_id: &Uuid, ttl_minutes: i64) -> Result<Credential, AppError> {
        let session = self
            .store
            .get_session_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session {} not found", session_id)))?;

        if session.owner_id != *issuer_id {
            record_audit_event(
                audit_events::CREDENTIAL_ISSUE_DENIED,
                false,
                Some(issuer_id),
                serde_json::json!({ "session_id": session_id }),
            );
            return Err(AppError::Forbidden("Only the session owner may issue credentials".to_string()));
        }

        // Bounds are checked on the raw minutes; an unchecked value would overflow `Duration`.
        let ttl = (self.config.min_ttl_minutes..=self.config.max_ttl_minutes)
            .contains(&ttl_minutes)
            .then(|| Duration::try_minutes(ttl_minutes))
            .flatten()
            .ok_or_else(|| {
                AppError::InvalidArgument(format!(
                    "ttl must be between {} and {} minutes",
                    self.config.min_ttl_minutes, self.config.max_ttl_minutes
                ))
            })?;

        let now = self.clock.now();
        if !session.active {
            return Err(AppError::InvalidState("Session is closed".to_string()));
        }
        if session.has_ended(now) {
            return Err(AppError::InvalidState("Session has already ended".to_string()));
        }

        let expires_at = (now + ttl).min(session.ends_at + Duration::minutes(self.config.end_grace_minutes));

        for _ in 0..MAX_ID_ATTEMPTS {
            let nonce = self.generate_nonce();
            let credential = Credential {
                id: derive_credential_id(session_id, issuer_id, &nonce, now),
                session_id: *session_id,
                issued_by: *issuer_id,
                nonce,
                issued_at: now,
                expires_at,
                active: true,
            };

            if self.store.insert_credential(&credential).await? {
                record_audit_event(
                    audit_events::CREDENTIAL_ISSUED,
                    true,
                    Some(issuer_id),
                    serde_json::json!({
                        "session_id": session_id,
                        "credential_id": credential.id,
                        "expires_at": credential.expires_at,
                    }),
                );
                return Ok(credential);
            }

            tracing::warn!(session_id = %session_id, "credential id collision, regenerating nonce");
        }

        Err(AppError::InvalidState("Could not allocate a unique credential id".to_string()))
    }

    /// Render the credential id as an SVG QR code wrapped in a data URL.
    pub fn render_qr(&self, credential: &Credential) -> Result<String, AppError> {
        let qr = QrCode::new(credential.id.as_bytes()).map_err(|e| AppError::InvalidState(format!("Failed to generate QR code: {}", e)))?;

        let dimension = self.config.qr_min_dimension;
        let qr_svg = qr.render::<qrcode::render::svg::Color>().min_dimensions(dimension, dimension).build();

        let base64_svg = general_purpose::STANDARD.encode(qr_svg.as_bytes());
        Ok(format!("data:image/svg+xml;base64,{}", base64_svg))
    }

    fn generate_nonce(&self) -> String {
        let mut nonce_bytes = vec![0u8; self.config.nonce_bytes];
        rand::RngCore::fill_bytes(&mut rand::rng(), &mut nonce_bytes);
        hex::encode(nonce_bytes)
    }
}

/// One-way id over everything that makes a credential unique, so ids cannot be enumerated.
pub(crate) fn derive_credential_id(session_id: &Uuid, issuer_id: &Uuid, nonce: &str, issued_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(issuer_id.as_bytes());
    hasher.update(nonce.as_bytes());
    hasher.update(issued_at.to_rfc3339().as_bytes());
    hex::encode(hasher.finalize())
}
