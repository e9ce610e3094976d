//! In-memory queue backend for tests and single-process deployments.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use freerange_core::{Priority, QueueItem};

use crate::error::QueueResult;
use super::{DeadLetterEntry, NotificationQueue, QueueDepth};

#[derive(Default)]
struct Inner {
    // One FIFO per priority level.
    queues: HashMap<Priority, VecDeque<QueueItem>>,
    // Ordered by (ready_at, insertion seq) so equal timestamps stay FIFO.
    delayed: BTreeMap<(DateTime<Utc>, u64), QueueItem>,
    retry: BTreeMap<(DateTime<Utc>, u64), QueueItem>,
    dead_letter: VecDeque<DeadLetterEntry>,
    seq: u64,
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

fn pop_due(
    map: &mut BTreeMap<(DateTime<Utc>, u64), QueueItem>,
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<QueueItem> {
    let due_keys: Vec<_> = map
        .range(..=(now, u64::MAX))
        .take(limit)
        .map(|(k, _)| *k)
        .collect();
    due_keys
        .into_iter()
        .filter_map(|key| map.remove(&key))
        .collect()
}

#[async_trait]
impl NotificationQueue for MemoryQueue {
    async fn enqueue(&self, item: QueueItem) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.queues.entry(item.priority).or_default().push_back(item);
        Ok(())
    }

    async fn enqueue_batch(&self, items: Vec<QueueItem>) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        for item in items {
            inner.queues.entry(item.priority).or_default().push_back(item);
        }
        Ok(())
    }

    async fn enqueue_scheduled(
        &self,
        item: QueueItem,
        ready_at: DateTime<Utc>,
    ) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq();
        inner.delayed.insert((ready_at, seq), item);
        Ok(())
    }

    async fn enqueue_retry(&self, item: QueueItem, delay: Duration) -> QueueResult<()> {
        let ready_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq();
        inner.retry.insert((ready_at, seq), item);
        Ok(())
    }

    async fn dequeue(&self) -> QueueResult<Option<QueueItem>> {
        let mut inner = self.inner.lock().await;
        for priority in Priority::DESCENDING {
            if let Some(queue) = inner.queues.get_mut(&priority) {
                if let Some(item) = queue.pop_front() {
                    return Ok(Some(item));
                }
            }
        }
        Ok(None)
    }

    async fn get_scheduled_items(&self, limit: usize) -> QueueResult<Vec<QueueItem>> {
        let mut inner = self.inner.lock().await;
        Ok(pop_due(&mut inner.delayed, Utc::now(), limit))
    }

    async fn get_retryable_items(&self, limit: usize) -> QueueResult<Vec<QueueItem>> {
        let mut inner = self.inner.lock().await;
        Ok(pop_due(&mut inner.retry, Utc::now(), limit))
    }

    async fn enqueue_deadletter(&self, item: QueueItem, reason: &str) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.dead_letter.push_back(DeadLetterEntry {
            item,
            reason: reason.to_string(),
            deadlettered_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_dlq(&self, limit: usize) -> QueueResult<Vec<DeadLetterEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner.dead_letter.iter().take(limit).cloned().collect())
    }

    async fn replay_dlq(&self, limit: usize) -> QueueResult<usize> {
        let mut inner = self.inner.lock().await;
        let mut replayed = 0;
        while replayed < limit {
            let Some(entry) = inner.dead_letter.pop_front() else {
                break;
            };
            inner
                .queues
                .entry(entry.item.priority)
                .or_default()
                .push_back(entry.item);
            replayed += 1;
        }
        Ok(replayed)
    }

    async fn purge_dlq_older_than(&self, cutoff: DateTime<Utc>) -> QueueResult<usize> {
        let mut inner = self.inner.lock().await;
        let before = inner.dead_letter.len();
        inner.dead_letter.retain(|entry| entry.deadlettered_at >= cutoff);
        Ok(before - inner.dead_letter.len())
    }

    async fn depth(&self) -> QueueResult<QueueDepth> {
        let inner = self.inner.lock().await;
        let mut by_priority = std::collections::HashMap::new();
        for priority in Priority::DESCENDING {
            let len = inner
                .queues
                .get(&priority)
                .map(|q| q.len() as u64)
                .unwrap_or(0);
            by_priority.insert(priority.as_str().to_string(), len);
        }
        Ok(QueueDepth {
            by_priority,
            delayed: inner.delayed.len() as u64,
            retry: inner.retry.len() as u64,
            dead_letter: inner.dead_letter.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn item(id: &str, priority: Priority) -> QueueItem {
        QueueItem {
            notification_id: id.to_string(),
            priority,
            retry_count: 0,
            enqueued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn strict_priority_with_fifo_within_level() {
        let queue = MemoryQueue::new();
        queue.enqueue(item("low-1", Priority::Low)).await.unwrap();
        queue.enqueue(item("norm-1", Priority::Normal)).await.unwrap();
        queue.enqueue(item("norm-2", Priority::Normal)).await.unwrap();
        queue.enqueue(item("crit-1", Priority::Critical)).await.unwrap();

        let order: Vec<String> = {
            let mut out = Vec::new();
            while let Some(i) = queue.dequeue().await.unwrap() {
                out.push(i.notification_id);
            }
            out
        };
        assert_eq!(order, vec!["crit-1", "norm-1", "norm-2", "low-1"]);
    }

    #[tokio::test]
    async fn scheduled_items_only_surface_when_due() {
        let queue = MemoryQueue::new();
        let now = Utc::now();
        queue
            .enqueue_scheduled(item("later", Priority::Normal), now + ChronoDuration::hours(1))
            .await
            .unwrap();
        queue
            .enqueue_scheduled(item("due", Priority::Normal), now - ChronoDuration::seconds(1))
            .await
            .unwrap();

        let due = queue.get_scheduled_items(10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].notification_id, "due");

        // The due item was popped; only the future one remains.
        let depth = queue.depth().await.unwrap();
        assert_eq!(depth.delayed, 1);
    }

    #[tokio::test]
    async fn retry_queue_respects_delay() {
        let queue = MemoryQueue::new();
        queue
            .enqueue_retry(item("r1", Priority::High), Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(queue.get_retryable_items(10).await.unwrap().is_empty());

        queue
            .enqueue_retry(item("r2", Priority::High), Duration::from_secs(0))
            .await
            .unwrap();
        let ready = queue.get_retryable_items(10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].notification_id, "r2");
    }

    #[tokio::test]
    async fn dlq_replay_moves_items_back() {
        let queue = MemoryQueue::new();
        queue
            .enqueue_deadletter(item("dead", Priority::Normal), "max retries exceeded")
            .await
            .unwrap();

        let listed = queue.list_dlq(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].reason.contains("max retries"));

        let replayed = queue.replay_dlq(10).await.unwrap();
        assert_eq!(replayed, 1);
        assert!(queue.list_dlq(10).await.unwrap().is_empty());
        let item = queue.dequeue().await.unwrap().expect("replayed item");
        assert_eq!(item.notification_id, "dead");
    }

    #[tokio::test]
    async fn purge_drops_only_old_entries() {
        let queue = MemoryQueue::new();
        queue
            .enqueue_deadletter(item("recent", Priority::Normal), "x")
            .await
            .unwrap();
        let purged = queue
            .purge_dlq_older_than(Utc::now() - ChronoDuration::hours(1))
            .await
            .unwrap();
        assert_eq!(purged, 0);
        let purged = queue
            .purge_dlq_older_than(Utc::now() + ChronoDuration::hours(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
    }
}
