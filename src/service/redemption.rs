use crate::audit::record_audit_event;
use crate::clock::Clock;
use crate::config::RedemptionConfig;
use crate::database::CheckinStore;
use crate::error::app_error::AppError;
use crate::models::audit::audit_events;
use crate::models::redemption::{RedemptionInsert, RedemptionRecord, RedemptionStatus};
use crate::rate_limit::{RateLimitDecision, RateLimiter};
use crate::service::validator::{CredentialCheck, CredentialValidator};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RedeemCommand {
    pub credential_id: String,
    pub subject_id: Uuid,
    /// When the subject scanned the code. Defaults to the current time.
    pub observed_at: Option<DateTime<Utc>>,
    pub location_claim: Option<String>,
}

/// Performs the exactly-once `UNREDEEMED -> REDEEMED` transition per
/// `(session, subject, day)`.
pub struct RedemptionEngine {
    store: Arc<dyn CheckinStore>,
    clock: Arc<dyn Clock>,
    limiter: Arc<dyn RateLimiter>,
    validator: CredentialValidator,
    config: RedemptionConfig,
    time_zone: Tz,
}

impl RedemptionEngine {
    pub fn new(
        store: Arc<dyn CheckinStore>,
        clock: Arc<dyn Clock>,
        limiter: Arc<dyn RateLimiter>,
        config: RedemptionConfig,
    ) -> Result<Self, AppError> {
        let time_zone = config.time_zone().map_err(AppError::InvalidArgument)?;
        let validator = CredentialValidator::new(store.clone(), clock.clone());

        Ok(RedemptionEngine {
            store,
            clock,
            limiter,
            validator,
            config,
            time_zone,
        })
    }

    pub async fn redeem(&self, command: &RedeemCommand) -> Result<RedemptionRecord, AppError> {
        let now = self.clock.now();
        let subject_id = &command.subject_id;

        if let decision @ RateLimitDecision::Limited { .. } = self.limiter.check(subject_id, now).await? {
            let retry_after_secs = decision.retry_after_secs().unwrap_or(1);
            record_audit_event(
                audit_events::REDEMPTION_THROTTLED,
                false,
                Some(subject_id),
                serde_json::json!({ "retry_after_secs": retry_after_secs }),
            );
            return Err(AppError::Throttled { retry_after_secs });
        }

        let (credential, session) = match self.validator.check(&command.credential_id, now).await? {
            CredentialCheck::Usable { credential, session } => (credential, session),
            CredentialCheck::Unusable { session_id, reason } => {
                record_audit_event(
                    audit_events::REDEMPTION_REJECTED,
                    false,
                    Some(subject_id),
                    serde_json::json!({ "credential_id": command.credential_id, "session_id": session_id, "reason": reason }),
                );
                return Err(AppError::InvalidCredential(reason));
            }
        };

        let observed_at = command.observed_at.unwrap_or(now);
        let skew = Duration::seconds(self.config.max_clock_skew_seconds);
        if observed_at > now + skew {
            return Err(AppError::InvalidArgument("observed_at lies in the future".to_string()));
        }
        if observed_at < now - skew {
            return Err(AppError::InvalidArgument("observed_at lies too far in the past".to_string()));
        }
        if observed_at < credential.issued_at {
            return Err(AppError::InvalidArgument("observed_at precedes the credential".to_string()));
        }

        let status = RedemptionStatus::classify(session.starts_at, session.ends_at, session.grace(), observed_at);
        let record = RedemptionRecord {
            id: Uuid::new_v4(),
            session_id: session.id,
            subject_id: *subject_id,
            credential_id: credential.id.clone(),
            // Keyed on server time so a client timestamp cannot pick the day.
            day: self.redemption_day(now),
            redeemed_at: observed_at,
            status,
            location_claim: command.location_claim.clone(),
        };

        match self.store.insert_redemption_if_absent(&record, now).await? {
            RedemptionInsert::Inserted(record) => {
                record_audit_event(
                    audit_events::REDEMPTION_RECORDED,
                    true,
                    Some(subject_id),
                    serde_json::json!({
                        "session_id": record.session_id,
                        "credential_id": record.credential_id,
                        "day": record.day,
                        "status": record.status,
                    }),
                );
                Ok(record)
            }
            RedemptionInsert::Duplicate => {
                record_audit_event(
                    audit_events::REDEMPTION_DUPLICATE,
                    false,
                    Some(subject_id),
                    serde_json::json!({ "session_id": record.session_id, "day": record.day }),
                );
                Err(AppError::DuplicateRedemption)
            }
            RedemptionInsert::Rejected(reason) => {
                record_audit_event(
                    audit_events::REDEMPTION_REJECTED,
                    false,
                    Some(subject_id),
                    serde_json::json!({ "credential_id": record.credential_id, "session_id": record.session_id, "reason": reason }),
                );
                Err(AppError::InvalidCredential(reason))
            }
        }
    }

    /// Calendar day in the configured zone that the exactly-once key is scoped to.
    pub fn redemption_day(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.time_zone).date_naive()
    }
}
