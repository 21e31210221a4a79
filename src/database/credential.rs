use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::credential::Credential;
use chrono::{DateTime, Utc};

#[async_trait::async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Insert-if-absent keyed by credential id. Returns `false` when the id is already taken.
    async fn insert_credential(&self, credential: &Credential) -> Result<bool, AppError>;
    async fn get_credential_by_id(&self, id: &str) -> Result<Option<Credential>, AppError>;
    /// Deactivate every active credential whose expiry is at or before `now`.
    async fn deactivate_expired_credentials(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

#[async_trait::async_trait]
impl CredentialRepository for PostgresRepository {
    async fn insert_credential(&self, credential: &Credential) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO credential (id, session_id, issued_by, nonce, issued_at, expires_at, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&credential.id)
        .bind(credential.session_id)
        .bind(credential.issued_by)
        .bind(&credential.nonce)
        .bind(credential.issued_at)
        .bind(credential.expires_at)
        .bind(credential.active)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_credential_by_id(&self, id: &str) -> Result<Option<Credential>, AppError> {
        let credential = sqlx::query_as::<_, Credential>(
            r#"
            SELECT id, session_id, issued_by, nonce, issued_at, expires_at, active
            FROM credential
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(credential)
    }

    async fn deactivate_expired_credentials(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("UPDATE credential SET active = FALSE WHERE active AND expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
