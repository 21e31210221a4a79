use crate::Config;
use crate::clock::SystemClock;
use crate::database::postgres_repository::PostgresRepository;
use crate::db::connect;
use crate::rate_limit::InMemoryRateLimiter;
use crate::service::checkin::{CheckinService, SweepReport};
use std::sync::Arc;

/// One-shot expiry sweep against the configured database, for external schedulers.
pub async fn sweep_expired(config: &Config) -> Result<SweepReport, String> {
    let pool = connect(&config.database)
        .await
        .map_err(|err| format!("Failed to initialize database pool: {err:?}"))?;

    let repo = Arc::new(PostgresRepository { pool: pool.clone() });
    let limiter = Arc::new(InMemoryRateLimiter::new(config.rate_limit.clone()));
    let service = CheckinService::new(repo, Arc::new(SystemClock), limiter, config).map_err(|err| format!("Invalid configuration: {err}"))?;

    let report = service.sweep_expired().await.map_err(|err| format!("Failed to sweep expired records: {err:?}"))?;

    pool.close().await;

    Ok(report)
}
