use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::session::{Session, SessionKind};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait::async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<Session, AppError>;
    async fn get_session_by_id(&self, id: &Uuid) -> Result<Option<Session>, AppError>;
    async fn deactivate_session(&self, id: &Uuid) -> Result<(), AppError>;
    /// Deactivate every active session whose window closed at or before `ended_by`.
    async fn deactivate_ended_sessions(&self, ended_by: DateTime<Utc>) -> Result<u64, AppError>;
}

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    owner_id: Uuid,
    kind: String,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    location: Option<String>,
    grace_minutes: i32,
    active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = AppError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let kind = SessionKind::from_db(&row.kind).ok_or_else(|| AppError::InvalidState(format!("unrecognized session kind '{}'", row.kind)))?;
        Ok(Session {
            id: row.id,
            owner_id: row.owner_id,
            kind,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            location: row.location,
            grace_minutes: row.grace_minutes,
            active: row.active,
            created_at: row.created_at,
        })
    }
}

#[async_trait::async_trait]
impl SessionRepository for PostgresRepository {
    async fn create_session(&self, session: &Session) -> Result<Session, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            INSERT INTO checkin_session (id, owner_id, kind, starts_at, ends_at, location, grace_minutes, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, owner_id, kind, starts_at, ends_at, location, grace_minutes, active, created_at
            "#,
        )
        .bind(session.id)
        .bind(session.owner_id)
        .bind(session.kind.to_db())
        .bind(session.starts_at)
        .bind(session.ends_at)
        .bind(&session.location)
        .bind(session.grace_minutes)
        .bind(session.active)
        .bind(session.created_at)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_session_by_id(&self, id: &Uuid) -> Result<Option<Session>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, owner_id, kind, starts_at, ends_at, location, grace_minutes, active, created_at
            FROM checkin_session
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Session::try_from).transpose()
    }

    async fn deactivate_session(&self, id: &Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE checkin_session SET active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn deactivate_ended_sessions(&self, ended_by: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("UPDATE checkin_session SET active = FALSE WHERE active AND ends_at <= $1")
            .bind(ended_by)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
