use crate::config::DatabaseConfig;
use crate::error::app_error::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

pub async fn init_pool(db_config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(db_config.max_connections)
        .min_connections(db_config.min_connections)
        .acquire_timeout(Duration::from_secs(db_config.acquire_timeout))
        .idle_timeout(Duration::from_secs(30))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&db_config.url)
        .await
}

/// Open the pool and, when configured, bring the schema up to date.
pub async fn connect(db_config: &DatabaseConfig) -> Result<PgPool, AppError> {
    let pool = init_pool(db_config).await?;
    tracing::info!("Database pool initialized successfully");

    if db_config.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AppError::store("Failed to apply migrations", e))?;
        tracing::info!("Database migrations applied");
    }

    Ok(pool)
}
