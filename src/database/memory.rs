use crate::auth::IdentityResolver;
use crate::database::credential::CredentialRepository;
use crate::database::redemption::RedemptionRepository;
use crate::database::session::SessionRepository;
use crate::error::app_error::AppError;
use crate::models::credential::{Credential, InvalidReason};
use crate::models::redemption::{RedemptionFilter, RedemptionInsert, RedemptionRecord, RedemptionStatus};
use crate::models::session::Session;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

type RedemptionKey = (Uuid, Uuid, NaiveDate);

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<Uuid, Session>,
    credentials: HashMap<String, Credential>,
    redemptions: HashMap<RedemptionKey, RedemptionRecord>,
    logins: HashMap<Uuid, Uuid>,
}

/// Single-process store. One lock guards every table so the conditional
/// redemption insert is atomic with respect to credential and session state.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a login session so `resolve_caller` accepts it.
    pub async fn register_login(&self, login_session_id: Uuid, user_id: Uuid) {
        self.state.lock().await.logins.insert(login_session_id, user_id);
    }

    pub async fn revoke_login(&self, login_session_id: &Uuid) {
        self.state.lock().await.logins.remove(login_session_id);
    }
}

#[async_trait::async_trait]
impl SessionRepository for InMemoryStore {
    async fn create_session(&self, session: &Session) -> Result<Session, AppError> {
        let mut state = self.state.lock().await;
        if state.sessions.contains_key(&session.id) {
            return Err(AppError::InvalidState(format!("session {} already exists", session.id)));
        }
        state.sessions.insert(session.id, session.clone());
        Ok(session.clone())
    }

    async fn get_session_by_id(&self, id: &Uuid) -> Result<Option<Session>, AppError> {
        Ok(self.state.lock().await.sessions.get(id).cloned())
    }

    async fn deactivate_session(&self, id: &Uuid) -> Result<(), AppError> {
        if let Some(session) = self.state.lock().await.sessions.get_mut(id) {
            session.active = false;
        }
        Ok(())
    }

    async fn deactivate_ended_sessions(&self, ended_by: DateTime<Utc>) -> Result<u64, AppError> {
        let mut state = self.state.lock().await;
        let mut count = 0;
        for session in state.sessions.values_mut().filter(|s| s.active && s.has_ended(ended_by)) {
            session.active = false;
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait::async_trait]
impl CredentialRepository for InMemoryStore {
    async fn insert_credential(&self, credential: &Credential) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        if state.credentials.contains_key(&credential.id) {
            return Ok(false);
        }
        state.credentials.insert(credential.id.clone(), credential.clone());
        Ok(true)
    }

    async fn get_credential_by_id(&self, id: &str) -> Result<Option<Credential>, AppError> {
        Ok(self.state.lock().await.credentials.get(id).cloned())
    }

    async fn deactivate_expired_credentials(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut state = self.state.lock().await;
        let mut count = 0;
        for credential in state.credentials.values_mut().filter(|c| c.active && c.is_expired(now)) {
            credential.active = false;
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait::async_trait]
impl RedemptionRepository for InMemoryStore {
    async fn insert_redemption_if_absent(&self, record: &RedemptionRecord, now: DateTime<Utc>) -> Result<RedemptionInsert, AppError> {
        let mut state = self.state.lock().await;

        let key = (record.session_id, record.subject_id, record.day);
        if state.redemptions.contains_key(&key) {
            return Ok(RedemptionInsert::Duplicate);
        }

        let Some(credential) = state.credentials.get(&record.credential_id).filter(|c| c.session_id == record.session_id) else {
            return Ok(RedemptionInsert::Rejected(InvalidReason::Unknown));
        };
        let session_active = state.sessions.get(&credential.session_id).is_some_and(|s| s.active);
        if !credential.active || !session_active {
            return Ok(RedemptionInsert::Rejected(InvalidReason::Inactive));
        }
        if credential.is_expired(now) {
            return Ok(RedemptionInsert::Rejected(InvalidReason::Expired));
        }

        state.redemptions.insert(key, record.clone());
        Ok(RedemptionInsert::Inserted(record.clone()))
    }

    async fn list_redemptions_for_subject(&self, subject_id: &Uuid, filter: &RedemptionFilter) -> Result<Vec<RedemptionRecord>, AppError> {
        let state = self.state.lock().await;
        let mut records: Vec<RedemptionRecord> = state
            .redemptions
            .values()
            .filter(|r| r.subject_id == *subject_id && filter.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.redeemed_at.cmp(&a.redeemed_at).then_with(|| b.id.cmp(&a.id)));
        records.truncate(usize::try_from(filter.effective_limit()).unwrap_or(0));
        Ok(records)
    }

    async fn list_redemptions_for_session(&self, session_id: &Uuid) -> Result<Vec<RedemptionRecord>, AppError> {
        let state = self.state.lock().await;
        let mut records: Vec<RedemptionRecord> = state.redemptions.values().filter(|r| r.session_id == *session_id).cloned().collect();
        records.sort_by(|a, b| a.redeemed_at.cmp(&b.redeemed_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn count_redemptions_by_status(&self, subject_id: &Uuid, filter: &RedemptionFilter) -> Result<Vec<(RedemptionStatus, i64)>, AppError> {
        let state = self.state.lock().await;
        let range = RedemptionFilter {
            status: None,
            ..filter.clone()
        };
        let mut counts: BTreeMap<RedemptionStatus, i64> = BTreeMap::new();
        for record in state.redemptions.values().filter(|r| r.subject_id == *subject_id && range.matches(r)) {
            *counts.entry(record.status).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}

#[async_trait::async_trait]
impl IdentityResolver for InMemoryStore {
    async fn resolve_caller(&self, login_session_id: &Uuid, user_id: &Uuid) -> Result<Option<Uuid>, AppError> {
        let state = self.state.lock().await;
        Ok(state.logins.get(login_session_id).filter(|owner| *owner == user_id).copied())
    }
}
