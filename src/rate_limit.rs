pub mod memory;
pub mod redis;

use crate::clock::Clock;
use crate::config::{RateLimitBackend, RateLimitConfig};
use crate::error::app_error::AppError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub use self::memory::InMemoryRateLimiter;
pub use self::redis::RedisRateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow,
    Limited { retry_after: Duration },
}

impl RateLimitDecision {
    /// Whole seconds to advertise in `Retry-After`, never zero.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            RateLimitDecision::Allow => None,
            RateLimitDecision::Limited { retry_after } => Some(retry_after.as_secs_f64().ceil().max(1.0) as u64),
        }
    }
}

/// Per-subject attempt budget for redemptions. Counting an attempt and deciding
/// on it happen in one step.
#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, subject_id: &Uuid, now: DateTime<Utc>) -> Result<RateLimitDecision, AppError>;
}

/// Build the configured limiter. The in-process one also gets its cleanup task.
pub async fn build_rate_limiter(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn RateLimiter>, AppError> {
    match config.backend {
        RateLimitBackend::Memory => {
            let limiter = Arc::new(InMemoryRateLimiter::new(config.clone()));
            limiter.clone().spawn_cleanup_task(clock);
            Ok(limiter)
        }
        RateLimitBackend::Redis => Ok(Arc::new(RedisRateLimiter::connect(config.clone()).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_rounds_up_to_whole_seconds() {
        let decision = RateLimitDecision::Limited {
            retry_after: Duration::from_millis(1500),
        };
        assert_eq!(decision.retry_after_secs(), Some(2));

        let decision = RateLimitDecision::Limited { retry_after: Duration::ZERO };
        assert_eq!(decision.retry_after_secs(), Some(1));
        assert_eq!(RateLimitDecision::Allow.retry_after_secs(), None);
    }
}
