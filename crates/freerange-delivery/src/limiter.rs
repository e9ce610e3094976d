//! Distributed counters with TTL windows.
//!
//! Two forms: a per-key daily counter (the user quota of the admission
//! policy; it resets at the day boundary, TTL-driven) and a sliding window
//! (per-application ingress rate limiting). Both must stay atomic across
//! concurrent callers, which the redis backend gets from server-side
//! `INCR`/`ZADD` and the in-memory backend from a mutex.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use freerange_core::{NotifyError, QuotaCounter};

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Atomically increment the daily counter behind `key`; true when the
    /// resulting value is within `limit`. The counter expires at the next
    /// day boundary (UTC).
    async fn increment_and_check_daily_limit(
        &self,
        key: &str,
        limit: u32,
    ) -> Result<bool, NotifyError>;

    /// Record one event and return true while the trailing window holds at
    /// most `max` events.
    async fn check_sliding_window(
        &self,
        key: &str,
        window_secs: u64,
        max: u32,
    ) -> Result<bool, NotifyError>;
}

fn seconds_to_next_utc_midnight() -> i64 {
    let now = Utc::now();
    let tomorrow = (now + chrono::Duration::days(1)).date_naive();
    let midnight = Utc
        .from_utc_datetime(&tomorrow.and_hms_opt(0, 0, 0).expect("valid midnight"));
    (midnight - now).num_seconds().max(1)
}

pub struct RedisRateLimiter {
    conn: Arc<RwLock<ConnectionManager>>,
    prefix: String,
}

impl RedisRateLimiter {
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self, NotifyError> {
        let client = redis::Client::open(redis_url).map_err(|e| NotifyError::Queue {
            message: format!("redis client: {}", e),
        })?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| NotifyError::Queue {
                message: format!("redis connection: {}", e),
            })?;
        Ok(Self {
            conn: Arc::new(RwLock::new(manager)),
            prefix: prefix.into(),
        })
    }

    fn redis_err(e: redis::RedisError) -> NotifyError {
        NotifyError::Queue {
            message: format!("limiter: {}", e),
        }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn increment_and_check_daily_limit(
        &self,
        key: &str,
        limit: u32,
    ) -> Result<bool, NotifyError> {
        // The date in the key plus the TTL gives the day-boundary reset.
        let date = Utc::now().date_naive();
        let full_key = format!("{}:quota:{}:{}", self.prefix, date, key);
        let mut conn = self.conn.write().await;
        let value: u64 = conn.incr(&full_key, 1u64).await.map_err(Self::redis_err)?;
        if value == 1 {
            let ttl = seconds_to_next_utc_midnight();
            let _: () = conn
                .expire(&full_key, ttl)
                .await
                .map_err(Self::redis_err)?;
        }
        Ok(value <= limit as u64)
    }

    async fn check_sliding_window(
        &self,
        key: &str,
        window_secs: u64,
        max: u32,
    ) -> Result<bool, NotifyError> {
        let full_key = format!("{}:rate:{}", self.prefix, key);
        let now_ms = Utc::now().timestamp_millis();
        let window_start = now_ms - (window_secs as i64) * 1000;
        let mut conn = self.conn.write().await;
        let _: () = conn
            .zrembyscore(&full_key, f64::MIN, window_start as f64)
            .await
            .map_err(Self::redis_err)?;
        let member = format!("{}:{}", now_ms, Uuid::new_v4());
        let _: () = conn
            .zadd(&full_key, member, now_ms as f64)
            .await
            .map_err(Self::redis_err)?;
        let _: () = conn
            .expire(&full_key, window_secs as i64)
            .await
            .map_err(Self::redis_err)?;
        let count: u64 = conn.zcard(&full_key).await.map_err(Self::redis_err)?;
        Ok(count <= max as u64)
    }
}

#[async_trait]
impl QuotaCounter for RedisRateLimiter {
    async fn increment_and_check(&self, key: &str, limit: u32) -> Result<bool, NotifyError> {
        self.increment_and_check_daily_limit(key, limit).await
    }
}

#[derive(Default)]
struct MemoryLimiterState {
    daily: HashMap<String, (chrono::NaiveDate, u64)>,
    windows: HashMap<String, VecDeque<Instant>>,
}

/// In-memory twin with the same semantics, for tests and single-process
/// deployments.
#[derive(Default)]
pub struct MemoryRateLimiter {
    state: Mutex<MemoryLimiterState>,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn increment_and_check_daily_limit(
        &self,
        key: &str,
        limit: u32,
    ) -> Result<bool, NotifyError> {
        let today = Utc::now().date_naive();
        let mut state = self.state.lock().await;
        let entry = state.daily.entry(key.to_string()).or_insert((today, 0));
        if entry.0 != today {
            *entry = (today, 0);
        }
        entry.1 += 1;
        Ok(entry.1 <= limit as u64)
    }

    async fn check_sliding_window(
        &self,
        key: &str,
        window_secs: u64,
        max: u32,
    ) -> Result<bool, NotifyError> {
        let now = Instant::now();
        let window = Duration::from_secs(window_secs);
        let mut state = self.state.lock().await;
        let events = state.windows.entry(key.to_string()).or_default();
        while let Some(front) = events.front() {
            if now.duration_since(*front) > window {
                events.pop_front();
            } else {
                break;
            }
        }
        events.push_back(now);
        Ok(events.len() <= max as usize)
    }
}

#[async_trait]
impl QuotaCounter for MemoryRateLimiter {
    async fn increment_and_check(&self, key: &str, limit: u32) -> Result<bool, NotifyError> {
        self.increment_and_check_daily_limit(key, limit).await
    }
}
