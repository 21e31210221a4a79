use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::credential::InvalidReason;
use crate::models::redemption::{RedemptionFilter, RedemptionInsert, RedemptionRecord, RedemptionStatus};
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

#[async_trait::async_trait]
pub trait RedemptionRepository: Send + Sync {
    /// Atomically record `record` unless one already exists for its
    /// `(session_id, subject_id, day)` key. The credential and its session must
    /// still be active and unexpired at `now` for the insert to happen.
    async fn insert_redemption_if_absent(&self, record: &RedemptionRecord, now: DateTime<Utc>) -> Result<RedemptionInsert, AppError>;
    async fn list_redemptions_for_subject(&self, subject_id: &Uuid, filter: &RedemptionFilter) -> Result<Vec<RedemptionRecord>, AppError>;
    async fn list_redemptions_for_session(&self, session_id: &Uuid) -> Result<Vec<RedemptionRecord>, AppError>;
    async fn count_redemptions_by_status(&self, subject_id: &Uuid, filter: &RedemptionFilter) -> Result<Vec<(RedemptionStatus, i64)>, AppError>;
}

#[derive(Debug, sqlx::FromRow)]
struct RedemptionRow {
    id: Uuid,
    session_id: Uuid,
    subject_id: Uuid,
    credential_id: String,
    redemption_day: NaiveDate,
    redeemed_at: DateTime<Utc>,
    status: String,
    location_claim: Option<String>,
}

impl TryFrom<RedemptionRow> for RedemptionRecord {
    type Error = AppError;

    fn try_from(row: RedemptionRow) -> Result<Self, Self::Error> {
        let status = RedemptionStatus::from_db(&row.status).ok_or_else(|| AppError::InvalidState(format!("unrecognized redemption status '{}'", row.status)))?;
        Ok(RedemptionRecord {
            id: row.id,
            session_id: row.session_id,
            subject_id: row.subject_id,
            credential_id: row.credential_id,
            day: row.redemption_day,
            redeemed_at: row.redeemed_at,
            status,
            location_claim: row.location_claim,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CredentialState {
    active: bool,
    session_active: bool,
    expires_at: DateTime<Utc>,
}

#[async_trait::async_trait]
impl RedemptionRepository for PostgresRepository {
    async fn insert_redemption_if_absent(&self, record: &RedemptionRecord, now: DateTime<Utc>) -> Result<RedemptionInsert, AppError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, RedemptionRow>(
            r#"
            INSERT INTO redemption (id, session_id, subject_id, credential_id, redemption_day, redeemed_at, status, location_claim)
            SELECT $1, $2, $3, c.id, $5, $6, $7, $8
            FROM credential c
            JOIN checkin_session s ON s.id = c.session_id
            WHERE c.id = $4
              AND c.session_id = $2
              AND c.active
              AND s.active
              AND c.expires_at > $9
            ON CONFLICT (session_id, subject_id, redemption_day) DO NOTHING
            RETURNING id, session_id, subject_id, credential_id, redemption_day, redeemed_at, status, location_claim
            "#,
        )
        .bind(record.id)
        .bind(record.session_id)
        .bind(record.subject_id)
        .bind(&record.credential_id)
        .bind(record.day)
        .bind(record.redeemed_at)
        .bind(record.status.to_db())
        .bind(&record.location_claim)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = inserted {
            tx.commit().await?;
            return Ok(RedemptionInsert::Inserted(row.try_into()?));
        }

        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM redemption
                WHERE session_id = $1 AND subject_id = $2 AND redemption_day = $3
            )
            "#,
        )
        .bind(record.session_id)
        .bind(record.subject_id)
        .bind(record.day)
        .fetch_one(&mut *tx)
        .await?;

        let outcome = if exists {
            RedemptionInsert::Duplicate
        } else {
            let state = sqlx::query_as::<_, CredentialState>(
                r#"
                SELECT c.active, s.active AS session_active, c.expires_at
                FROM credential c
                JOIN checkin_session s ON s.id = c.session_id
                WHERE c.id = $1 AND c.session_id = $2
                "#,
            )
            .bind(&record.credential_id)
            .bind(record.session_id)
            .fetch_optional(&mut *tx)
            .await?;

            let reason = match state {
                None => InvalidReason::Unknown,
                Some(state) if !state.active || !state.session_active => InvalidReason::Inactive,
                Some(state) if now >= state.expires_at => InvalidReason::Expired,
                // Deactivated between the insert and this read.
                Some(_) => InvalidReason::Inactive,
            };
            RedemptionInsert::Rejected(reason)
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn list_redemptions_for_subject(&self, subject_id: &Uuid, filter: &RedemptionFilter) -> Result<Vec<RedemptionRecord>, AppError> {
        let rows = sqlx::query_as::<_, RedemptionRow>(
            r#"
            SELECT id, session_id, subject_id, credential_id, redemption_day, redeemed_at, status, location_claim
            FROM redemption
            WHERE subject_id = $1
              AND ($2::date IS NULL OR redemption_day >= $2)
              AND ($3::date IS NULL OR redemption_day <= $3)
              AND ($4::text IS NULL OR status = $4)
            ORDER BY redeemed_at DESC, id DESC
            LIMIT $5
            "#,
        )
        .bind(subject_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.status.map(RedemptionStatus::to_db))
        .bind(filter.effective_limit())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RedemptionRecord::try_from).collect()
    }

    async fn list_redemptions_for_session(&self, session_id: &Uuid) -> Result<Vec<RedemptionRecord>, AppError> {
        let rows = sqlx::query_as::<_, RedemptionRow>(
            r#"
            SELECT id, session_id, subject_id, credential_id, redemption_day, redeemed_at, status, location_claim
            FROM redemption
            WHERE session_id = $1
            ORDER BY redeemed_at ASC, id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RedemptionRecord::try_from).collect()
    }

    async fn count_redemptions_by_status(&self, subject_id: &Uuid, filter: &RedemptionFilter) -> Result<Vec<(RedemptionStatus, i64)>, AppError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*)
            FROM redemption
            WHERE subject_id = $1
              AND ($2::date IS NULL OR redemption_day >= $2)
              AND ($3::date IS NULL OR redemption_day <= $3)
            GROUP BY status
            "#,
        )
        .bind(subject_id)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(status, count)| {
                RedemptionStatus::from_db(&status)
                    .map(|status| (status, count))
                    .ok_or_else(|| AppError::InvalidState(format!("unrecognized redemption status '{status}'")))
            })
            .collect()
    }
}
