//! Queue layer.
//!
//! Five logical queues per deployment: four strict-priority FIFO queues (a
//! dequeue always returns the highest-priority available item, FIFO within a
//! level), a delayed queue ordered by ready-at timestamp, a retry queue with
//! the same semantics, and a dead-letter queue for items that exhausted
//! their retry budget or hit a permanent provider failure.
//!
//! Queue items carry only `{notification_id, priority, retry_count,
//! enqueued_at}`. Workers refetch the document, so queue payloads never go
//! stale and stay small on the wire.

mod memory;
mod redis_queue;

pub use memory::MemoryQueue;
pub use redis_queue::RedisQueue;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use freerange_core::QueueItem;

use crate::error::QueueResult;

/// Depth by priority plus the auxiliary queues.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueDepth {
    pub by_priority: HashMap<String, u64>,
    pub delayed: u64,
    pub retry: u64,
    pub dead_letter: u64,
}

/// A quarantined item with the reason it was dead-lettered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub item: QueueItem,
    pub reason: String,
    pub deadlettered_at: DateTime<Utc>,
}

#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Enqueue into the priority queue matching the item's priority.
    async fn enqueue(&self, item: QueueItem) -> QueueResult<()>;

    async fn enqueue_batch(&self, items: Vec<QueueItem>) -> QueueResult<()>;

    /// Park an item until `ready_at`; the scheduler promotes it later.
    async fn enqueue_scheduled(&self, item: QueueItem, ready_at: DateTime<Utc>)
        -> QueueResult<()>;

    /// Park an item for retry after `delay`.
    async fn enqueue_retry(&self, item: QueueItem, delay: Duration) -> QueueResult<()>;

    /// Highest-priority available item, or `None` when every queue is empty.
    /// Non-blocking; callers own the poll cadence.
    async fn dequeue(&self) -> QueueResult<Option<QueueItem>>;

    /// Pop up to `limit` items from the delayed queue whose ready-at has
    /// passed.
    async fn get_scheduled_items(&self, limit: usize) -> QueueResult<Vec<QueueItem>>;

    /// Pop up to `limit` items from the retry queue whose back-off has
    /// elapsed.
    async fn get_retryable_items(&self, limit: usize) -> QueueResult<Vec<QueueItem>>;

    async fn enqueue_deadletter(&self, item: QueueItem, reason: &str) -> QueueResult<()>;

    async fn list_dlq(&self, limit: usize) -> QueueResult<Vec<DeadLetterEntry>>;

    /// Move up to `limit` dead-lettered items back into the priority queues.
    /// Returns how many were replayed.
    async fn replay_dlq(&self, limit: usize) -> QueueResult<usize>;

    /// Drop dead-letter entries older than `cutoff`. Returns how many were
    /// purged.
    async fn purge_dlq_older_than(&self, cutoff: DateTime<Utc>) -> QueueResult<usize>;

    async fn depth(&self) -> QueueResult<QueueDepth>;
}
