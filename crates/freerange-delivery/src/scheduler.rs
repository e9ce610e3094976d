//! Scheduler.
//!
//! Promotes due items from the delayed and retry queues into the priority
//! queues, then runs a fallback resync against the durable store for
//! pending documents whose schedule has come due but that never made it
//! into the delayed queue (a transient queue failure at admission). Both
//! sources are deliberately redundant; workers re-check document status
//! before transitioning, so a double promotion is harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use freerange_core::{NotificationStatus, QueueItem};
use freerange_store::Repositories;

use crate::queue::NotificationQueue;

struct Inner {
    queue: Arc<dyn NotificationQueue>,
    repos: Repositories,
    tick_interval: Duration,
    batch: usize,
    running: RwLock<bool>,
}

pub struct Scheduler {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        queue: Arc<dyn NotificationQueue>,
        repos: Repositories,
        tick_interval: Duration,
        batch: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue,
                repos,
                tick_interval,
                batch,
                running: RwLock::new(false),
            }),
            handle: Mutex::new(None),
        }
    }

    pub async fn start(&self) {
        {
            let mut running = self.inner.running.write().await;
            if *running {
                return;
            }
            *running = true;
        }
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.tick_interval);
            loop {
                ticker.tick().await;
                if !*inner.running.read().await {
                    break;
                }
                tick(&inner).await;
            }
            info!("scheduler stopped");
        });
        *self.handle.lock().await = Some(handle);
        info!("scheduler started");
    }

    pub async fn stop(&self) {
        *self.inner.running.write().await = false;
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
    }

    /// One scheduling pass: promote due delayed/retry items, then resync
    /// from the store. Exposed for tests and the admin surface.
    pub async fn run_once(&self) {
        tick(&self.inner).await;
    }
}

async fn tick(inner: &Inner) {
    promote_due(inner).await;
    resync_from_store(inner).await;
}

async fn promote_due(inner: &Inner) {
    for (label, items) in [
        ("delayed", inner.queue.get_scheduled_items(inner.batch).await),
        ("retry", inner.queue.get_retryable_items(inner.batch).await),
    ] {
        let items = match items {
            Ok(items) => items,
            Err(e) => {
                error!(queue = label, error = %e, "failed to pull due items");
                continue;
            }
        };
        if items.is_empty() {
            continue;
        }
        let ids: Vec<String> = items
            .iter()
            .map(|item| item.notification_id.clone())
            .collect();
        debug!(queue = label, count = items.len(), "promoting due items");
        if let Err(e) = inner.queue.enqueue_batch(items).await {
            error!(queue = label, error = %e, "failed to enqueue promoted items");
            continue;
        }
        if let Err(e) = inner
            .repos
            .notifications
            .bulk_update_status(&ids, NotificationStatus::Queued)
            .await
        {
            error!(queue = label, error = %e, "failed to mark promoted items queued");
        }
    }
}

async fn resync_from_store(inner: &Inner) {
    let due = match inner
        .repos
        .notifications
        .find_due_pending(Utc::now(), inner.batch)
        .await
    {
        Ok(due) => due,
        Err(e) => {
            error!(error = %e, "resync query failed");
            return;
        }
    };
    if due.is_empty() {
        return;
    }

    info!(count = due.len(), "resync found pending documents outside the delayed queue");
    let ids: Vec<String> = due.iter().map(|n| n.notification_id.clone()).collect();
    let items: Vec<QueueItem> = due.iter().map(QueueItem::for_notification).collect();
    if let Err(e) = inner.queue.enqueue_batch(items).await {
        error!(error = %e, "resync enqueue failed");
        return;
    }
    if let Err(e) = inner
        .repos
        .notifications
        .bulk_update_status(&ids, NotificationStatus::Queued)
        .await
    {
        error!(error = %e, "resync status update failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use freerange_core::{Channel, Notification, NotificationContent, Priority};
    use freerange_store::{MemoryStore, NotificationRepository};

    fn scheduler(store: Arc<MemoryStore>, queue: Arc<MemoryQueue>) -> Scheduler {
        let repos = Repositories {
            notifications: store.clone(),
            users: store.clone(),
            applications: store.clone(),
            templates: store,
        };
        Scheduler::new(queue, repos, Duration::from_millis(50), 100)
    }

    fn pending_notification(scheduled_at: Option<chrono::DateTime<Utc>>) -> Notification {
        let mut n = Notification::new(
            "a1",
            "u1",
            Channel::Push,
            Priority::Normal,
            NotificationContent::default(),
        );
        n.scheduled_at = scheduled_at;
        n
    }

    #[tokio::test]
    async fn promotes_due_delayed_items_once() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let n = pending_notification(Some(Utc::now() - chrono::Duration::seconds(1)));
        NotificationRepository::create(store.as_ref(), &n).await.unwrap();
        queue
            .enqueue_scheduled(QueueItem::for_notification(&n), n.scheduled_at.unwrap())
            .await
            .unwrap();

        let s = scheduler(store.clone(), queue.clone());
        s.run_once().await;

        // Exactly one copy in the priority queues, status now queued.
        let item = queue.dequeue().await.unwrap().expect("promoted item");
        assert_eq!(item.notification_id, n.notification_id);
        assert!(queue.dequeue().await.unwrap().is_none());
        let after = NotificationRepository::get_by_id(store.as_ref(), &n.notification_id)
            .await
            .unwrap();
        assert_eq!(after.status, NotificationStatus::Queued);

        // A second tick does not duplicate the item.
        s.run_once().await;
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn future_items_stay_parked() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let n = pending_notification(Some(Utc::now() + chrono::Duration::hours(1)));
        NotificationRepository::create(store.as_ref(), &n).await.unwrap();
        queue
            .enqueue_scheduled(QueueItem::for_notification(&n), n.scheduled_at.unwrap())
            .await
            .unwrap();

        let s = scheduler(store.clone(), queue.clone());
        s.run_once().await;

        assert!(queue.dequeue().await.unwrap().is_none());
        let after = NotificationRepository::get_by_id(store.as_ref(), &n.notification_id)
            .await
            .unwrap();
        assert_eq!(after.status, NotificationStatus::Pending);
    }

    #[tokio::test]
    async fn resync_recovers_documents_missing_from_delayed_queue() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        // Persisted as pending but never parked: a transient queue failure
        // at admission time.
        let n = pending_notification(None);
        NotificationRepository::create(store.as_ref(), &n).await.unwrap();

        let s = scheduler(store.clone(), queue.clone());
        s.run_once().await;

        let item = queue.dequeue().await.unwrap().expect("resynced item");
        assert_eq!(item.notification_id, n.notification_id);
        let after = NotificationRepository::get_by_id(store.as_ref(), &n.notification_id)
            .await
            .unwrap();
        assert_eq!(after.status, NotificationStatus::Queued);

        // Idempotent across ticks.
        s.run_once().await;
        assert!(queue.dequeue().await.unwrap().is_none());
    }
}
