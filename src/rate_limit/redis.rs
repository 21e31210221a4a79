use std::time::Duration;

use crate::config::RateLimitConfig;
use crate::error::app_error::AppError;
use crate::rate_limit::{RateLimitDecision, RateLimiter};
use chrono::{DateTime, Utc};
use redis::Client;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use uuid::Uuid;

const KEY_PREFIX: &str = "checkin:redeem-attempts";

/// Fixed-window counter shared by every instance. Windows follow the Redis
/// server's clock, so `now` is not consulted.
#[derive(Clone)]
pub struct RedisRateLimiter {
    config: RateLimitConfig,
    connection: ConnectionManager,
}

impl RedisRateLimiter {
    pub async fn connect(config: RateLimitConfig) -> Result<Self, AppError> {
        let manager_config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(Some(Duration::from_millis(500)));

        let client = Client::open(config.redis_url.as_str())?;
        let connection = client.get_connection_manager_with_config(manager_config).await?;
        tracing::info!("Redis rate limiter connected");

        Ok(Self { config, connection })
    }

    fn cooldown_ms(&self) -> u64 {
        self.config.cooldown_seconds.max(1) * 1000
    }
}

pub(crate) fn attempts_key(subject_id: &Uuid) -> String {
    format!("{KEY_PREFIX}:{subject_id}")
}

#[async_trait::async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, subject_id: &Uuid, _now: DateTime<Utc>) -> Result<RateLimitDecision, AppError> {
        let key = attempts_key(subject_id);
        let mut conn = self.connection.clone();

        let count: u64 = redis::cmd("INCR").arg(&key).query_async(&mut conn).await?;
        if count == 1 {
            redis::cmd("PEXPIRE").arg(&key).arg(self.cooldown_ms()).query_async::<()>(&mut conn).await?;
        }

        if count <= u64::from(self.config.max_attempts) {
            return Ok(RateLimitDecision::Allow);
        }

        let ttl_ms: i64 = redis::cmd("PTTL").arg(&key).query_async(&mut conn).await?;
        let retry_after_ms = if ttl_ms > 0 {
            ttl_ms.unsigned_abs()
        } else {
            // Key lost its expiry; restart the window.
            redis::cmd("PEXPIRE").arg(&key).arg(self.cooldown_ms()).query_async::<()>(&mut conn).await?;
            self.cooldown_ms()
        };

        Ok(RateLimitDecision::Limited {
            retry_after: Duration::from_millis(retry_after_ms),
        })
    }
}
