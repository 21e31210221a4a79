use crate::auth::IdentityResolver;
use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use uuid::Uuid;

#[async_trait::async_trait]
impl IdentityResolver for PostgresRepository {
    async fn resolve_caller(&self, login_session_id: &Uuid, user_id: &Uuid) -> Result<Option<Uuid>, AppError> {
        let user_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT user_id
            FROM user_session
            WHERE id = $1
              AND user_id = $2
              AND expires_at > now()
            "#,
        )
        .bind(login_session_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user_id)
    }
}
