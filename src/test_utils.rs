use crate::auth::{IdentityResolver, SESSION_COOKIE, session_cookie_value};
use crate::clock::Clock;
use crate::config::{Config, DatabaseConfig, StorageBackend};
use crate::database::credential::CredentialRepository;
use crate::database::memory::InMemoryStore;
use crate::database::postgres_repository::PostgresRepository;
use crate::database::redemption::RedemptionRepository;
use crate::database::session::SessionRepository;
use crate::error::app_error::AppError;
use crate::models::credential::Credential;
use crate::models::redemption::{RedemptionFilter, RedemptionInsert, RedemptionRecord, RedemptionStatus};
use crate::models::session::{NewSession, Session, SessionKind};
use crate::rate_limit::InMemoryRateLimiter;
use crate::service::checkin::CheckinService;
use crate::{AppState, build_rocket_with};
use chrono::{DateTime, TimeZone, Utc};
use rocket::http::Cookie;
use rocket::local::asynchronous::Client;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// `hour:minute` on the fixed test day, 2026-03-02 UTC.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0).unwrap()
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        ManualClock { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub fn class_session(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Session {
    Session {
        id: Uuid::new_v4(),
        owner_id: Uuid::new_v4(),
        kind: SessionKind::Class,
        starts_at,
        ends_at,
        location: Some("Room 101".to_string()),
        grace_minutes: 15,
        active: true,
        created_at: starts_at - chrono::Duration::days(1),
    }
}

pub fn sample_credential(session: &Session, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Credential {
    let nonce = hex::encode(Uuid::new_v4().as_bytes());
    Credential {
        id: crate::service::issuer::derive_credential_id(&session.id, &session.owner_id, &nonce, issued_at),
        session_id: session.id,
        issued_by: session.owner_id,
        nonce,
        issued_at,
        expires_at,
        active: true,
    }
}

/// Repository over the database at `DATABASE_URL`, schema migrated.
pub async fn postgres_repository() -> PostgresRepository {
    let config = DatabaseConfig {
        url: std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
        run_migrations: true,
        ..DatabaseConfig::default()
    };
    let pool = crate::db::connect(&config).await.expect("database reachable");
    PostgresRepository { pool }
}

/// Store wrapper whose redemption writes commit before an artificial delay,
/// simulating a response lost after the write landed.
pub struct SlowStore {
    inner: Arc<InMemoryStore>,
    delay: Duration,
    delay_redemptions: AtomicBool,
}

impl SlowStore {
    pub fn new(inner: Arc<InMemoryStore>, delay: Duration) -> Self {
        SlowStore {
            inner,
            delay,
            delay_redemptions: AtomicBool::new(false),
        }
    }

    pub fn delay_after_redemption_write(&self, enabled: bool) {
        self.delay_redemptions.store(enabled, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl SessionRepository for SlowStore {
    async fn create_session(&self, session: &Session) -> Result<Session, AppError> {
        self.inner.create_session(session).await
    }

    async fn get_session_by_id(&self, id: &Uuid) -> Result<Option<Session>, AppError> {
        self.inner.get_session_by_id(id).await
    }

    async fn deactivate_session(&self, id: &Uuid) -> Result<(), AppError> {
        self.inner.deactivate_session(id).await
    }

    async fn deactivate_ended_sessions(&self, ended_by: DateTime<Utc>) -> Result<u64, AppError> {
        self.inner.deactivate_ended_sessions(ended_by).await
    }
}

#[async_trait::async_trait]
impl CredentialRepository for SlowStore {
    async fn insert_credential(&self, credential: &Credential) -> Result<bool, AppError> {
        self.inner.insert_credential(credential).await
    }

    async fn get_credential_by_id(&self, id: &str) -> Result<Option<Credential>, AppError> {
        self.inner.get_credential_by_id(id).await
    }

    async fn deactivate_expired_credentials(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        self.inner.deactivate_expired_credentials(now).await
    }
}

#[async_trait::async_trait]
impl RedemptionRepository for SlowStore {
    async fn insert_redemption_if_absent(&self, record: &RedemptionRecord, now: DateTime<Utc>) -> Result<RedemptionInsert, AppError> {
        let outcome = self.inner.insert_redemption_if_absent(record, now).await?;
        if self.delay_redemptions.load(Ordering::SeqCst) {
            tokio::time::sleep(self.delay).await;
        }
        Ok(outcome)
    }

    async fn list_redemptions_for_subject(&self, subject_id: &Uuid, filter: &RedemptionFilter) -> Result<Vec<RedemptionRecord>, AppError> {
        self.inner.list_redemptions_for_subject(subject_id, filter).await
    }

    async fn list_redemptions_for_session(&self, session_id: &Uuid) -> Result<Vec<RedemptionRecord>, AppError> {
        self.inner.list_redemptions_for_session(session_id).await
    }

    async fn count_redemptions_by_status(&self, subject_id: &Uuid, filter: &RedemptionFilter) -> Result<Vec<(RedemptionStatus, i64)>, AppError> {
        self.inner.count_redemptions_by_status(subject_id, filter).await
    }
}

/// A logged-in caller for HTTP tests.
pub struct TestUser {
    pub login_session_id: Uuid,
    pub user_id: Uuid,
}

impl TestUser {
    pub fn cookie(&self) -> Cookie<'static> {
        Cookie::new(SESSION_COOKIE, session_cookie_value(&self.login_session_id, &self.user_id))
    }
}

/// The full application over in-memory storage and a manual clock.
pub struct TestApp {
    pub client: Client,
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryStore>,
    pub service: Arc<CheckinService>,
}

impl TestApp {
    pub async fn new(now: DateTime<Utc>) -> Self {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        config.api.enable_swagger = false;

        let clock = Arc::new(ManualClock::new(now));
        let store = Arc::new(InMemoryStore::new());
        let limiter = Arc::new(InMemoryRateLimiter::new(config.rate_limit.clone()));
        let service = Arc::new(CheckinService::new(store.clone(), clock.clone(), limiter, &config).expect("valid service config"));
        let identity: Arc<dyn IdentityResolver> = store.clone();

        let state = AppState {
            service: service.clone(),
            identity,
        };
        let client = Client::tracked(build_rocket_with(config, state)).await.expect("valid rocket instance");

        TestApp { client, clock, store, service }
    }

    pub async fn login(&self) -> TestUser {
        let user = TestUser {
            login_session_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        };
        self.store.register_login(user.login_session_id, user.user_id).await;
        user
    }

    /// A class session from 10:00 to 11:00 owned by `owner`.
    pub async fn open_session(&self, owner: &TestUser) -> Session {
        let request = NewSession {
            owner_id: owner.user_id,
            kind: SessionKind::Class,
            starts_at: at(10, 0),
            ends_at: at(11, 0),
            location: Some("Room 101".to_string()),
            grace_minutes: None,
        };
        self.service.open_session(request, None).await.expect("session opens")
    }

    pub async fn issue(&self, owner: &TestUser, session_id: &Uuid, ttl_minutes: i64) -> String {
        let (credential, _) = self.service.issue_credential(session_id, &owner.user_id, ttl_minutes, None).await.expect("credential issues");
        credential.id
    }
}
