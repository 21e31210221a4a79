use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::error::app_error::AppError;
use crate::rate_limit::{RateLimitDecision, RateLimiter};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Counter {
    window_start: DateTime<Utc>,
    count: u32,
}

/// Fixed-window counter per subject, driven by the caller's clock.
#[derive(Debug)]
pub struct InMemoryRateLimiter {
    config: RateLimitConfig,
    window: chrono::Duration,
    counters: Mutex<HashMap<Uuid, Counter>>,
}

impl InMemoryRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let window = chrono::Duration::seconds(i64::try_from(config.cooldown_seconds.max(1)).unwrap_or(i64::MAX));

        Self {
            config,
            window,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn spawn_cleanup_task(self: Arc<Self>, clock: Arc<dyn Clock>) {
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                ticker.tick().await;
                let now = clock.now();
                let window = self.window;
                let mut counters = self.counters.lock().await;
                counters.retain(|_, counter| now - counter.window_start < window);
            }
        });
    }
}

#[async_trait::async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, subject_id: &Uuid, now: DateTime<Utc>) -> Result<RateLimitDecision, AppError> {
        let mut counters = self.counters.lock().await;
        let counter = counters.entry(*subject_id).or_insert_with(|| Counter { window_start: now, count: 0 });

        if now - counter.window_start >= self.window || now < counter.window_start {
            counter.window_start = now;
            counter.count = 0;
        }

        if counter.count >= self.config.max_attempts {
            let remaining = self.window - (now - counter.window_start);
            return Ok(RateLimitDecision::Limited {
                retry_after: remaining.to_std().unwrap_or(Duration::ZERO),
            });
        }

        counter.count += 1;
        Ok(RateLimitDecision::Allow)
    }
}
