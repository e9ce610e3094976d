//! Redis queue backend.
//!
//! One list per priority level (`LPUSH`/`RPOP` keeps FIFO within a level;
//! the dequeue scans levels highest-first for strict priority), sorted sets
//! keyed by ready-at timestamp for the delayed and retry queues, and a list
//! for the dead-letter queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::warn;

use freerange_core::{Priority, QueueItem};

use crate::error::QueueResult;
use super::{DeadLetterEntry, NotificationQueue, QueueDepth};

pub struct RedisQueue {
    conn: Arc<RwLock<ConnectionManager>>,
    prefix: String,
}

impl RedisQueue {
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            conn: Arc::new(RwLock::new(manager)),
            prefix: prefix.into(),
        })
    }

    fn priority_key(&self, priority: Priority) -> String {
        format!("{}:queue:{}", self.prefix, priority.as_str())
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.prefix)
    }

    fn retry_key(&self) -> String {
        format!("{}:retry", self.prefix)
    }

    fn dlq_key(&self) -> String {
        format!("{}:dlq", self.prefix)
    }

    async fn push(&self, item: &QueueItem) -> QueueResult<()> {
        let payload = serde_json::to_string(item)?;
        let key = self.priority_key(item.priority);
        let mut conn = self.conn.write().await;
        let _: () = conn.lpush(&key, payload).await?;
        Ok(())
    }

    async fn park(&self, key: &str, item: &QueueItem, ready_at: DateTime<Utc>) -> QueueResult<()> {
        let payload = serde_json::to_string(item)?;
        let score = ready_at.timestamp_millis() as f64;
        let mut conn = self.conn.write().await;
        let _: () = conn.zadd(key, payload, score).await?;
        Ok(())
    }

    /// Pop members of a sorted set whose score has come due.
    async fn pop_due(&self, key: &str, limit: usize) -> QueueResult<Vec<QueueItem>> {
        let now = Utc::now().timestamp_millis() as f64;
        let mut conn = self.conn.write().await;
        let members: Vec<String> = conn
            .zrangebyscore_limit(key, f64::MIN, now, 0, limit as isize)
            .await?;
        let mut items = Vec::with_capacity(members.len());
        for member in members {
            let removed: i64 = conn.zrem(key, &member).await?;
            // Another instance may have claimed the member between the range
            // read and the removal; only the one that removed it owns it.
            if removed == 0 {
                continue;
            }
            match serde_json::from_str::<QueueItem>(&member) {
                Ok(item) => items.push(item),
                Err(e) => warn!(error = %e, "dropping unparseable queue member"),
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl NotificationQueue for RedisQueue {
    async fn enqueue(&self, item: QueueItem) -> QueueResult<()> {
        self.push(&item).await
    }

    async fn enqueue_batch(&self, items: Vec<QueueItem>) -> QueueResult<()> {
        for item in items {
            self.push(&item).await?;
        }
        Ok(())
    }

    async fn enqueue_scheduled(
        &self,
        item: QueueItem,
        ready_at: DateTime<Utc>,
    ) -> QueueResult<()> {
        self.park(&self.delayed_key(), &item, ready_at).await
    }

    async fn enqueue_retry(&self, item: QueueItem, delay: Duration) -> QueueResult<()> {
        let ready_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.park(&self.retry_key(), &item, ready_at).await
    }

    async fn dequeue(&self) -> QueueResult<Option<QueueItem>> {
        let mut conn = self.conn.write().await;
        for priority in Priority::DESCENDING {
            let key = self.priority_key(priority);
            let popped: Option<String> = conn.rpop(&key, None).await?;
            if let Some(payload) = popped {
                match serde_json::from_str::<QueueItem>(&payload) {
                    Ok(item) => return Ok(Some(item)),
                    Err(e) => {
                        warn!(error = %e, "dropping unparseable queue item");
                        continue;
                    }
                }
            }
        }
        Ok(None)
    }

    async fn get_scheduled_items(&self, limit: usize) -> QueueResult<Vec<QueueItem>> {
        self.pop_due(&self.delayed_key(), limit).await
    }

    async fn get_retryable_items(&self, limit: usize) -> QueueResult<Vec<QueueItem>> {
        self.pop_due(&self.retry_key(), limit).await
    }

    async fn enqueue_deadletter(&self, item: QueueItem, reason: &str) -> QueueResult<()> {
        let entry = DeadLetterEntry {
            item,
            reason: reason.to_string(),
            deadlettered_at: Utc::now(),
        };
        let payload = serde_json::to_string(&entry)?;
        let mut conn = self.conn.write().await;
        let _: () = conn.lpush(self.dlq_key(), payload).await?;
        Ok(())
    }

    async fn list_dlq(&self, limit: usize) -> QueueResult<Vec<DeadLetterEntry>> {
        let mut conn = self.conn.write().await;
        let raw: Vec<String> = conn
            .lrange(self.dlq_key(), 0, limit.saturating_sub(1) as isize)
            .await?;
        Ok(raw
            .iter()
            .filter_map(|payload| serde_json::from_str(payload).ok())
            .collect())
    }

    async fn replay_dlq(&self, limit: usize) -> QueueResult<usize> {
        let mut replayed = 0;
        while replayed < limit {
            let popped: Option<String> = {
                let mut conn = self.conn.write().await;
                conn.rpop(self.dlq_key(), None).await?
            };
            let Some(payload) = popped else { break };
            match serde_json::from_str::<DeadLetterEntry>(&payload) {
                Ok(entry) => {
                    self.push(&entry.item).await?;
                    replayed += 1;
                }
                Err(e) => warn!(error = %e, "dropping unparseable dead-letter entry"),
            }
        }
        Ok(replayed)
    }

    async fn purge_dlq_older_than(&self, cutoff: DateTime<Utc>) -> QueueResult<usize> {
        let key = self.dlq_key();
        let mut conn = self.conn.write().await;
        let raw: Vec<String> = conn.lrange(&key, 0, -1).await?;
        let retained: Vec<&String> = raw
            .iter()
            .filter(|payload| {
                serde_json::from_str::<DeadLetterEntry>(payload)
                    .map(|entry| entry.deadlettered_at >= cutoff)
                    .unwrap_or(false)
            })
            .collect();
        let purged = raw.len() - retained.len();
        if purged > 0 {
            let _: () = conn.del(&key).await?;
            for payload in retained {
                let _: () = conn.rpush(&key, payload).await?;
            }
        }
        Ok(purged)
    }

    async fn depth(&self) -> QueueResult<QueueDepth> {
        let mut conn = self.conn.write().await;
        let mut by_priority = HashMap::new();
        for priority in Priority::DESCENDING {
            let len: u64 = conn.llen(self.priority_key(priority)).await?;
            by_priority.insert(priority.as_str().to_string(), len);
        }
        let delayed: u64 = conn.zcard(self.delayed_key()).await?;
        let retry: u64 = conn.zcard(self.retry_key()).await?;
        let dead_letter: u64 = conn.llen(self.dlq_key()).await?;
        Ok(QueueDepth {
            by_priority,
            delayed,
            retry,
            dead_letter,
        })
    }
}
