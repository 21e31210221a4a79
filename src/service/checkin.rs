use crate::audit::record_audit_event;
use crate::clock::Clock;
use crate::config::Config;
use crate::database::CheckinStore;
use crate::error::app_error::AppError;
use crate::models::audit::audit_events;
use crate::models::credential::{Credential, CredentialValidation};
use crate::models::redemption::{RedemptionFilter, RedemptionRecord, RedemptionStats};
use crate::models::session::{NewSession, Session};
use crate::rate_limit::RateLimiter;
use crate::service::issuer::CredentialIssuer;
use crate::service::redemption::{RedeemCommand, RedemptionEngine};
use crate::service::validator::CredentialValidator;
use chrono::Duration;
use rocket::serde::Serialize;
use schemars::JsonSchema;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq, JsonSchema)]
pub struct SweepReport {
    pub credentials_deactivated: u64,
    pub sessions_deactivated: u64,
}

/// Entry point for every check-in operation. Each call runs under
/// `min(caller deadline, operation timeout)`.
pub struct CheckinService {
    store: Arc<dyn CheckinStore>,
    clock: Arc<dyn Clock>,
    issuer: CredentialIssuer,
    validator: CredentialValidator,
    engine: RedemptionEngine,
    default_grace_minutes: i32,
    /// How long an ended session stays active for the sweep; matches the credential expiry clamp.
    end_grace: Duration,
    operation_timeout: std::time::Duration,
}

impl CheckinService {
    pub fn new(store: Arc<dyn CheckinStore>, clock: Arc<dyn Clock>, limiter: Arc<dyn RateLimiter>, config: &Config) -> Result<Self, AppError> {
        let issuer = CredentialIssuer::new(store.clone(), clock.clone(), config.credential.clone());
        let validator = CredentialValidator::new(store.clone(), clock.clone());
        let engine = RedemptionEngine::new(store.clone(), clock.clone(), limiter, config.redemption.clone())?;

        Ok(CheckinService {
            store,
            clock,
            issuer,
            validator,
            engine,
            default_grace_minutes: config.redemption.default_grace_minutes,
            end_grace: Duration::minutes(config.credential.end_grace_minutes),
            operation_timeout: std::time::Duration::from_millis(config.redemption.operation_timeout_ms),
        })
    }

    async fn within_deadline<T, F>(&self, deadline: Option<std::time::Duration>, operation: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        let limit = deadline.map_or(self.operation_timeout, |d| d.min(self.operation_timeout));
        match tokio::time::timeout(limit, operation).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout_ms = %limit.as_millis(), "check-in operation exceeded its deadline");
                Err(AppError::DeadlineExceeded)
            }
        }
    }

    pub async fn open_session(&self, request: NewSession, deadline: Option<std::time::Duration>) -> Result<Session, AppError> {
        if request.starts_at >= request.ends_at {
            return Err(AppError::InvalidArgument("starts_at must be before ends_at".to_string()));
        }
        let grace_minutes = request.grace_minutes.unwrap_or(self.default_grace_minutes);
        if grace_minutes < 0 {
            return Err(AppError::InvalidArgument("grace_minutes must not be negative".to_string()));
        }

        let now = self.clock.now();
        if request.ends_at <= now {
            return Err(AppError::InvalidState("Session window has already ended".to_string()));
        }

        let session = Session {
            id: Uuid::new_v4(),
            owner_id: request.owner_id,
            kind: request.kind,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            location: request.location,
            grace_minutes,
            active: true,
            created_at: now,
        };

        let session = self.within_deadline(deadline, self.store.create_session(&session)).await?;
        record_audit_event(
            audit_events::SESSION_OPENED,
            true,
            Some(&session.owner_id),
            serde_json::json!({ "session_id": session.id, "kind": session.kind.to_db() }),
        );
        Ok(session)
    }

    /// Owner-only, idempotent. Credentials of a closed session stop validating.
    pub async fn close_session(&self, session_id: &Uuid, caller_id: &Uuid, deadline: Option<std::time::Duration>) -> Result<Session, AppError> {
        self.within_deadline(deadline, async {
            let mut session = self.owned_session(session_id, caller_id).await?;
            if session.active {
                self.store.deactivate_session(session_id).await?;
                session.active = false;
                record_audit_event(audit_events::SESSION_CLOSED, true, Some(caller_id), serde_json::json!({ "session_id": session_id }));
            }
            Ok(session)
        })
        .await
    }

    /// Returns the credential together with its QR data URL.
    pub async fn issue_credential(
        &self,
        session_id: &Uuid,
        issuer_id: &Uuid,
        ttl_minutes: i64,
        deadline: Option<std::time::Duration>,
    ) -> Result<(Credential, String), AppError> {
        let credential = self.within_deadline(deadline, self.issuer.issue(session_id, issuer_id, ttl_minutes)).await?;
        let qr_code = self.issuer.render_qr(&credential)?;
        Ok((credential, qr_code))
    }

    pub async fn validate_credential(&self, credential_id: &str, deadline: Option<std::time::Duration>) -> Result<CredentialValidation, AppError> {
        self.within_deadline(deadline, self.validator.validate(credential_id)).await
    }

    /// A timed-out call has an unknown outcome; retrying it is safe and yields
    /// either the record or `DuplicateRedemption`.
    pub async fn redeem(&self, command: &RedeemCommand, deadline: Option<std::time::Duration>) -> Result<RedemptionRecord, AppError> {
        self.within_deadline(deadline, self.engine.redeem(command)).await
    }

    pub async fn list_redemptions(&self, subject_id: &Uuid, filter: &RedemptionFilter, deadline: Option<std::time::Duration>) -> Result<Vec<RedemptionRecord>, AppError> {
        if let (Some(from), Some(to)) = (filter.from, filter.to)
            && from > to
        {
            return Err(AppError::InvalidArgument("from must not be after to".to_string()));
        }
        self.within_deadline(deadline, self.store.list_redemptions_for_subject(subject_id, filter)).await
    }

    pub async fn session_roster(&self, session_id: &Uuid, caller_id: &Uuid, deadline: Option<std::time::Duration>) -> Result<Vec<RedemptionRecord>, AppError> {
        self.within_deadline(deadline, async {
            self.owned_session(session_id, caller_id).await?;
            self.store.list_redemptions_for_session(session_id).await
        })
        .await
    }

    pub async fn redemption_stats(&self, subject_id: &Uuid, filter: &RedemptionFilter, deadline: Option<std::time::Duration>) -> Result<RedemptionStats, AppError> {
        let counts = self.within_deadline(deadline, self.store.count_redemptions_by_status(subject_id, filter)).await?;
        Ok(RedemptionStats::from_counts(&counts))
    }

    /// Deactivates elapsed credentials and sessions. Nothing is deleted.
    ///
    /// Sessions stay active until `end_grace_minutes` after they end, so credentials
    /// still in their validity window keep recording late arrivals as absent.
    pub async fn sweep_expired(&self) -> Result<SweepReport, AppError> {
        let now = self.clock.now();
        let report = self
            .within_deadline(None, async {
                Ok(SweepReport {
                    credentials_deactivated: self.store.deactivate_expired_credentials(now).await?,
                    sessions_deactivated: self.store.deactivate_ended_sessions(now - self.end_grace).await?,
                })
            })
            .await?;

        if report.credentials_deactivated > 0 {
            record_audit_event(
                audit_events::CREDENTIALS_SWEPT,
                true,
                None,
                serde_json::json!({ "count": report.credentials_deactivated, "at": now }),
            );
        }
        if report.sessions_deactivated > 0 {
            record_audit_event(
                audit_events::SESSIONS_SWEPT,
                true,
                None,
                serde_json::json!({ "count": report.sessions_deactivated, "at": now }),
            );
        }
        Ok(report)
    }

    async fn owned_session(&self, session_id: &Uuid, caller_id: &Uuid) -> Result<Session, AppError> {
        let session = self
            .store
            .get_session_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session {} not found", session_id)))?;
        if session.owner_id != *caller_id {
            return Err(AppError::Forbidden("Only the session owner may do this".to_string()));
        }
        Ok(session)
    }
}

/// Spawn the periodic in-process sweep.
pub fn spawn_sweep_task(service: Arc<CheckinService>, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = service.sweep_expired().await {
                tracing::error!(error = %err, "expiry sweep failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::database::memory::InMemoryStore;
    use crate::models::credential::InvalidReason;
    use crate::models::redemption::RedemptionStatus;
    use crate::models::session::{MealType, SessionKind};
    use crate::rate_limit::InMemoryRateLimiter;
    use crate::test_utils::{ManualClock, SlowStore, at};
    use tokio::task::JoinSet;

    fn service_with(store: Arc<dyn CheckinStore>, clock: Arc<ManualClock>, max_attempts: u32) -> CheckinService {
        let config = Config::default();
        let limiter = Arc::new(InMemoryRateLimiter::new(RateLimitConfig {
            max_attempts,
            ..config.rate_limit.clone()
        }));
        CheckinService::new(store, clock, limiter, &config).unwrap()
    }

    fn new_session(owner_id: Uuid) -> NewSession {
        NewSession {
            owner_id,
            kind: SessionKind::Class,
            starts_at: at(10, 0),
            ends_at: at(11, 0),
            location: Some("Room 101".to_string()),
            grace_minutes: None,
        }
    }

    fn redeem_command(credential_id: &str, subject_id: Uuid) -> RedeemCommand {
        RedeemCommand {
            credential_id: credential_id.to_string(),
            subject_id,
            observed_at: None,
            location_claim: None,
        }
    }

    #[tokio::test]
    async fn end_to_end_class_scenario() {
        let clock = Arc::new(ManualClock::new(at(9, 0)));
        let service = service_with(Arc::new(InMemoryStore::new()), clock.clone(), 1);
        let owner = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let session = service.open_session(new_session(owner), None).await.unwrap();

        clock.set(at(9, 50));
        let (credential, _) = service.issue_credential(&session.id, &owner, 30, None).await.unwrap();
        assert_eq!(credential.expires_at, at(10, 20));

        clock.set(at(10, 5));
        let record = service.redeem(&redeem_command(&credential.id, alice), None).await.unwrap();
        assert_eq!(record.status, RedemptionStatus::Present);

        // One minute later: the 30s cooldown has passed, the exactly-once key has not.
        clock.set(at(10, 6));
        let err = service.redeem(&redeem_command(&credential.id, alice), None).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateRedemption));

        clock.set(at(10, 25));
        let err = service.redeem(&redeem_command(&credential.id, bob), None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCredential(InvalidReason::Expired)));

        let roster = service.session_roster(&session.id, &owner, None).await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].subject_id, alice);
    }

    #[tokio::test]
    async fn concurrent_redemptions_yield_exactly_one_record() {
        for n in [1usize, 2, 8, 32] {
            let clock = Arc::new(ManualClock::new(at(9, 55)));
            let service = Arc::new(service_with(Arc::new(InMemoryStore::new()), clock.clone(), 1000));
            let owner = Uuid::new_v4();
            let subject = Uuid::new_v4();
            let session = service.open_session(new_session(owner), None).await.unwrap();
            let (credential, _) = service.issue_credential(&session.id, &owner, 30, None).await.unwrap();

            let mut tasks = JoinSet::new();
            for _ in 0..n {
                let service = service.clone();
                let command = redeem_command(&credential.id, subject);
                tasks.spawn(async move { service.redeem(&command, None).await });
            }

            let (mut recorded, mut duplicates) = (0, 0);
            while let Some(outcome) = tasks.join_next().await {
                match outcome.unwrap() {
                    Ok(_) => recorded += 1,
                    Err(AppError::DuplicateRedemption) => duplicates += 1,
                    Err(other) => panic!("unexpected outcome: {other}"),
                }
            }

            assert_eq!(recorded, 1, "n = {n}");
            assert_eq!(duplicates, n - 1, "n = {n}");
            assert_eq!(service.session_roster(&session.id, &owner, None).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn retry_after_timeout_reports_duplicate() {
        let clock = Arc::new(ManualClock::new(at(9, 55)));
        let store = Arc::new(InMemoryStore::new());
        let slow = Arc::new(SlowStore::new(store.clone(), std::time::Duration::from_millis(200)));
        let service = service_with(slow.clone(), clock.clone(), 1);
        let owner = Uuid::new_v4();
        let subject = Uuid::new_v4();

        let session = service.open_session(new_session(owner), None).await.unwrap();
        let (credential, _) = service.issue_credential(&session.id, &owner, 30, None).await.unwrap();

        slow.delay_after_redemption_write(true);
        let err = service
            .redeem(&redeem_command(&credential.id, subject), Some(std::time::Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DeadlineExceeded));
        assert!(err.is_retryable());

        slow.delay_after_redemption_write(false);
        clock.set(at(9, 56));
        let err = service.redeem(&redeem_command(&credential.id, subject), None).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateRedemption));
        assert_eq!(service.session_roster(&session.id, &owner, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn only_owner_may_issue_close_or_read_roster() {
        let clock = Arc::new(ManualClock::new(at(9, 0)));
        let service = service_with(Arc::new(InMemoryStore::new()), clock, 1);
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let session = service.open_session(new_session(owner), None).await.unwrap();

        let err = service.issue_credential(&session.id, &stranger, 30, None).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        let err = service.close_session(&session.id, &stranger, None).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        let err = service.session_roster(&session.id, &stranger, None).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn closing_a_session_invalidates_its_credentials() {
        let clock = Arc::new(ManualClock::new(at(9, 50)));
        let service = service_with(Arc::new(InMemoryStore::new()), clock, 1);
        let owner = Uuid::new_v4();
        let session = service.open_session(new_session(owner), None).await.unwrap();
        let (credential, _) = service.issue_credential(&session.id, &owner, 30, None).await.unwrap();

        let closed = service.close_session(&session.id, &owner, None).await.unwrap();
        assert!(!closed.active);
        assert!(!service.close_session(&session.id, &owner, None).await.unwrap().active);

        let validation = service.validate_credential(&credential.id, None).await.unwrap();
        assert_eq!(validation.reason, Some(InvalidReason::Inactive));
        let err = service.issue_credential(&session.id, &owner, 30, None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn open_session_rejects_bad_windows() {
        let clock = Arc::new(ManualClock::new(at(12, 0)));
        let service = service_with(Arc::new(InMemoryStore::new()), clock, 1);
        let owner = Uuid::new_v4();

        let inverted = NewSession {
            starts_at: at(13, 0),
            ends_at: at(13, 0),
            ..new_session(owner)
        };
        assert!(matches!(service.open_session(inverted, None).await.unwrap_err(), AppError::InvalidArgument(_)));

        assert!(matches!(service.open_session(new_session(owner), None).await.unwrap_err(), AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn open_session_applies_default_grace_and_kind() {
        let clock = Arc::new(ManualClock::new(at(9, 0)));
        let service = service_with(Arc::new(InMemoryStore::new()), clock, 1);
        let lunch = NewSession {
            kind: SessionKind::Meal { meal_type: MealType::Lunch },
            ..new_session(Uuid::new_v4())
        };

        let session = service.open_session(lunch, None).await.unwrap();

        assert_eq!(session.grace_minutes, 15);
        assert_eq!(session.kind, SessionKind::Meal { meal_type: MealType::Lunch });
        assert!(session.active);
    }

    #[tokio::test]
    async fn history_and_stats_are_scoped_to_subject() {
        let clock = Arc::new(ManualClock::new(at(9, 50)));
        let service = service_with(Arc::new(InMemoryStore::new()), clock.clone(), 100);
        let owner = Uuid::new_v4();
        let (subject, other) = (Uuid::new_v4(), Uuid::new_v4());

        let first = service.open_session(new_session(owner), None).await.unwrap();
        let second = service
            .open_session(
                NewSession {
                    starts_at: at(10, 0),
                    ends_at: at(12, 0),
                    ..new_session(owner)
                },
                None,
            )
            .await
            .unwrap();
        let (c1, _) = service.issue_credential(&first.id, &owner, 60, None).await.unwrap();
        let (c2, _) = service.issue_credential(&second.id, &owner, 60, None).await.unwrap();

        clock.set(at(10, 5));
        service.redeem(&redeem_command(&c1.id, subject), None).await.unwrap();
        service.redeem(&redeem_command(&c1.id, other), None).await.unwrap();
        clock.set(at(10, 30));
        service.redeem(&redeem_command(&c2.id, subject), None).await.unwrap();

        let history = service.list_redemptions(&subject, &RedemptionFilter::default(), None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].session_id, second.id);

        let late_only = RedemptionFilter {
            status: Some(RedemptionStatus::Late),
            ..Default::default()
        };
        let history = service.list_redemptions(&subject, &late_only, None).await.unwrap();
        assert_eq!(history.len(), 1);

        let stats = service.redemption_stats(&subject, &RedemptionFilter::default(), None).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status.get(&RedemptionStatus::Present), Some(&1));
        assert_eq!(stats.by_status.get(&RedemptionStatus::Late), Some(&1));

        let inverted = RedemptionFilter {
            from: Some(at(10, 0).date_naive().succ_opt().unwrap()),
            to: Some(at(10, 0).date_naive()),
            ..Default::default()
        };
        assert!(matches!(
            service.list_redemptions(&subject, &inverted, None).await.unwrap_err(),
            AppError::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn sweep_deactivates_elapsed_state() {
        let clock = Arc::new(ManualClock::new(at(9, 50)));
        let service = service_with(Arc::new(InMemoryStore::new()), clock.clone(), 1);
        let owner = Uuid::new_v4();
        let session = service.open_session(new_session(owner), None).await.unwrap();
        let (credential, _) = service.issue_credential(&session.id, &owner, 30, None).await.unwrap();

        assert_eq!(service.sweep_expired().await.unwrap(), SweepReport::default());

        clock.set(at(11, 0));
        let report = service.sweep_expired().await.unwrap();
        assert_eq!(report.credentials_deactivated, 1);
        assert_eq!(report.sessions_deactivated, 0);

        let validation = service.validate_credential(&credential.id, None).await.unwrap();
        assert_eq!(validation.reason, Some(InvalidReason::Expired));

        clock.set(at(12, 59));
        assert_eq!(service.sweep_expired().await.unwrap(), SweepReport::default());

        clock.set(at(13, 0));
        let report = service.sweep_expired().await.unwrap();
        assert_eq!(report.sessions_deactivated, 1);
        assert!(!service.store.get_session_by_id(&session.id).await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn late_arrival_after_sweep_is_recorded_absent() {
        let clock = Arc::new(ManualClock::new(at(10, 30)));
        let service = service_with(Arc::new(InMemoryStore::new()), clock.clone(), 1);
        let owner = Uuid::new_v4();
        let session = service.open_session(new_session(owner), None).await.unwrap();
        let (credential, _) = service.issue_credential(&session.id, &owner, 240, None).await.unwrap();
        assert_eq!(credential.expires_at, at(13, 0));

        clock.set(at(11, 1));
        assert_eq!(service.sweep_expired().await.unwrap(), SweepReport::default());

        clock.set(at(11, 5));
        let record = service.redeem(&redeem_command(&credential.id, Uuid::new_v4()), None).await.unwrap();
        assert_eq!(record.status, RedemptionStatus::Absent);
    }

    #[tokio::test]
    async fn explicit_close_still_cascades_immediately() {
        let clock = Arc::new(ManualClock::new(at(10, 30)));
        let service = service_with(Arc::new(InMemoryStore::new()), clock.clone(), 1);
        let owner = Uuid::new_v4();
        let session = service.open_session(new_session(owner), None).await.unwrap();
        let (credential, _) = service.issue_credential(&session.id, &owner, 240, None).await.unwrap();

        service.close_session(&session.id, &owner, None).await.unwrap();

        clock.set(at(11, 5));
        let err = service.redeem(&redeem_command(&credential.id, Uuid::new_v4()), None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCredential(InvalidReason::Inactive)));
    }
}
