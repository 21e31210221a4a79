use crate::clock::Clock;
use crate::database::CheckinStore;
use crate::error::app_error::AppError;
use crate::models::credential::{Credential, CredentialValidation, InvalidReason};
use crate::models::session::Session;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of inspecting a credential without touching stored state.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialCheck {
    Usable { credential: Credential, session: Session },
    Unusable { session_id: Option<Uuid>, reason: InvalidReason },
}

pub struct CredentialValidator {
    store: Arc<dyn CheckinStore>,
    clock: Arc<dyn Clock>,
}

impl CredentialValidator {
    pub fn new(store: Arc<dyn CheckinStore>, clock: Arc<dyn Clock>) -> Self {
        CredentialValidator { store, clock }
    }

    pub async fn validate(&self, credential_id: &str) -> Result<CredentialValidation, AppError> {
        let validation = match self.check(credential_id, self.clock.now()).await? {
            CredentialCheck::Usable { credential, .. } => CredentialValidation::valid(&credential),
            CredentialCheck::Unusable { session_id, reason } => CredentialValidation::invalid(credential_id, session_id, reason),
        };
        Ok(validation)
    }

    /// Checks run in order: existence, then active (credential and its session), then expiry.
    /// The first failure decides the reason.
    pub async fn check(&self, credential_id: &str, now: DateTime<Utc>) -> Result<CredentialCheck, AppError> {
        let Some(credential) = self.store.get_credential_by_id(credential_id).await? else {
            return Ok(CredentialCheck::Unusable {
                session_id: None,
                reason: InvalidReason::Unknown,
            });
        };

        let session = self.store.get_session_by_id(&credential.session_id).await?;
        let session = match session {
            Some(session) if credential.active && session.active => session,
            _ => {
                return Ok(CredentialCheck::Unusable {
                    session_id: Some(credential.session_id),
                    reason: InvalidReason::Inactive,
                });
            }
        };

        if credential.is_expired(now) {
            return Ok(CredentialCheck::Unusable {
                session_id: Some(credential.session_id),
                reason: InvalidReason::Expired,
            });
        }

        Ok(CredentialCheck::Usable { credential, session })
    }
}
