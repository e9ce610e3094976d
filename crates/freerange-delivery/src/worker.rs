//! Worker pool.
//!
//! A fixed number of workers share the priority queues. Each loop iteration
//! dequeues, refetches the notification document (the queue item carries
//! only the id), re-checks preferences, drives the provider manager, and
//! applies the resulting state transition: sent, retried with back-off, or
//! dead-lettered. Workers hold no shared mutable state beyond the queues
//! and the store, so any number of them can run across processes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use freerange_core::{
    AdmissionRequest, Notification, NotificationStatus, PolicyEvaluator, QueueItem,
    RecurrenceRule,
};
use freerange_core::config::WorkerConfig;
use freerange_store::{Repositories, StoreError};

use crate::backoff::backoff_delay;
use crate::manager::ProviderManager;
use crate::providers::ProviderErrorKind;
use crate::queue::NotificationQueue;

struct Inner {
    queue: Arc<dyn NotificationQueue>,
    repos: Repositories,
    manager: Arc<ProviderManager>,
    policy: PolicyEvaluator,
    config: WorkerConfig,
    poll_interval: Duration,
    running: RwLock<bool>,
}

pub struct WorkerPool {
    inner: Arc<Inner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn NotificationQueue>,
        repos: Repositories,
        manager: Arc<ProviderManager>,
        config: WorkerConfig,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue,
                repos,
                manager,
                policy: PolicyEvaluator::new(),
                config,
                poll_interval,
                running: RwLock::new(false),
            }),
            handles: Mutex::new(Vec::new()),
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
        let mut handles = self.handles.lock().await;
        for worker_id in 0..self.inner.config.count {
            let inner = Arc::clone(&self.inner);
            handles.push(tokio::spawn(async move {
                worker_loop(inner, worker_id).await;
            }));
        }
        info!(workers = self.inner.config.count, "worker pool started");
    }

    /// Stop accepting work and wait for in-flight items up to the grace
    /// period. Items whose provider call outlives the grace period are left
    /// in `processing`; the scheduler resync re-queues them after restart.
    pub async fn stop(&self) {
        *self.inner.running.write().await = false;
        let grace = Duration::from_secs(self.inner.config.shutdown_grace_secs);
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if tokio::time::timeout(grace, handle).await.is_err() {
                warn!("worker did not drain within the grace period");
            }
        }
        info!("worker pool stopped");
    }

    /// Process at most one queued item. Returns whether an item was
    /// processed. Used by tests and by operators poking a wedged queue.
    pub async fn process_next(&self) -> bool {
        match self.inner.queue.dequeue().await {
            Ok(Some(item)) => {
                process_item(&self.inner, item).await;
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!(error = %e, "dequeue failed");
                false
            }
        }
    }
}

async fn worker_loop(inner: Arc<Inner>, worker_id: usize) {
    info!(worker_id, "worker started");
    loop {
        if !*inner.running.read().await {
            break;
        }
        match inner.queue.dequeue().await {
            Ok(Some(item)) => process_item(&inner, item).await,
            Ok(None) => tokio::time::sleep(inner.poll_interval).await,
            Err(e) => {
                error!(worker_id, error = %e, "dequeue failed");
                tokio::time::sleep(inner.poll_interval).await;
            }
        }
    }
    info!(worker_id, "worker stopped");
}

async fn process_item(inner: &Inner, item: QueueItem) {
    let mut notification = match inner
        .repos
        .notifications
        .get_by_id(&item.notification_id)
        .await
    {
        Ok(n) => n,
        Err(StoreError::NotFound { .. }) => {
            debug!(notification_id = %item.notification_id, "document gone, dropping item");
            return;
        }
        Err(e) => {
            error!(notification_id = %item.notification_id, error = %e, "refetch failed");
            let delay = Duration::from_secs(inner.config.backoff_base_secs);
            if let Err(e) = inner.queue.enqueue_retry(item, delay).await {
                error!(error = %e, "failed to park item after store error");
            }
            return;
        }
    };

    let queue_latency_ms = (Utc::now() - item.enqueued_at).num_milliseconds();
    debug!(
        notification_id = %notification.notification_id,
        queue_latency_ms,
        priority = %notification.priority,
        "item dequeued"
    );

    // The scheduler may promote an item that a worker (or a replayed DLQ
    // entry) already handled; only pending/queued documents proceed.
    if !matches!(
        notification.status,
        NotificationStatus::Pending | NotificationStatus::Queued
    ) {
        debug!(
            notification_id = %notification.notification_id,
            status = %notification.status,
            "skipping item in non-dispatchable state"
        );
        return;
    }

    if notification.transition(NotificationStatus::Processing).is_err() {
        return;
    }
    if let Err(e) = inner.repos.notifications.update(&notification).await {
        error!(notification_id = %notification.notification_id, error = %e, "status update failed");
        return;
    }

    let user = match inner
        .repos
        .users
        .get_in_app(&notification.app_id, &notification.user_id)
        .await
    {
        Ok(user) => user,
        Err(StoreError::NotFound { .. }) => {
            dead_letter(inner, notification, item, "user_not_found").await;
            return;
        }
        Err(e) => {
            error!(error = %e, "user fetch failed");
            requeue_after_store_error(inner, notification, item).await;
            return;
        }
    };

    let app = match inner
        .repos
        .applications
        .get_by_id(&notification.app_id)
        .await
    {
        Ok(app) => app,
        Err(StoreError::NotFound { .. }) => {
            dead_letter(inner, notification, item, "application_not_found").await;
            return;
        }
        Err(e) => {
            error!(error = %e, "application fetch failed");
            requeue_after_store_error(inner, notification, item).await;
            return;
        }
    };

    // Preferences may have changed since admission.
    let request = AdmissionRequest {
        channel: notification.channel,
        priority: notification.priority,
        category: notification.category.as_deref(),
    };
    if let Err(rejection) = inner
        .policy
        .recheck_before_send(&app, &user, &request, Utc::now())
    {
        info!(
            notification_id = %notification.notification_id,
            reason = %rejection,
            "cancelling: preferences no longer allow delivery"
        );
        if notification.transition(NotificationStatus::Cancelled).is_ok() {
            notification.error_message = Some(rejection.to_string());
            if let Err(e) = inner.repos.notifications.update(&notification).await {
                error!(error = %e, "failed to persist cancellation");
            }
        }
        return;
    }

    let response = inner.manager.send(&notification, &user, &app).await;

    if response.success {
        if notification.transition(NotificationStatus::Sent).is_ok() {
            if let Err(e) = inner.repos.notifications.update(&notification).await {
                error!(error = %e, "failed to persist sent status");
            }
        }
        info!(
            notification_id = %notification.notification_id,
            provider = response.provider,
            queue_latency_ms,
            "notification sent"
        );
        schedule_recurrence(inner, &notification).await;
        return;
    }

    let reason = response
        .message
        .unwrap_or_else(|| "provider failure".to_string());
    match response.error_kind {
        ProviderErrorKind::None => {
            // No live stream subscriber. Back to queued; the presence
            // check-in flush owns delivery from here.
            if notification.transition(NotificationStatus::Queued).is_ok() {
                if let Err(e) = inner.repos.notifications.update(&notification).await {
                    error!(error = %e, "failed to requeue stream notification");
                }
            }
            debug!(
                notification_id = %notification.notification_id,
                "no subscribers, left queued for check-in flush"
            );
        }
        ProviderErrorKind::Invalid | ProviderErrorKind::Permanent => {
            warn!(
                notification_id = %notification.notification_id,
                provider = response.provider,
                error_type = ?response.error_kind,
                reason = %reason,
                "permanent provider failure"
            );
            dead_letter(inner, notification, item, &reason).await;
        }
        ProviderErrorKind::Transient | ProviderErrorKind::RateLimited => {
            notification.retry_count += 1;
            let max_retries = app.settings.retry_attempts;
            if notification.retry_count > max_retries {
                let reason = format!(
                    "max retries exceeded ({}/{}): {}",
                    notification.retry_count, max_retries, reason
                );
                dead_letter(inner, notification, item, &reason).await;
                return;
            }

            let mut delay = backoff_delay(
                notification.retry_count,
                Duration::from_secs(inner.config.backoff_base_secs),
                Duration::from_secs(inner.config.backoff_cap_secs),
            );
            if response.error_kind == ProviderErrorKind::RateLimited {
                delay = delay.max(Duration::from_secs(inner.config.rate_limited_floor_secs));
            }

            if notification.transition(NotificationStatus::Queued).is_ok() {
                if let Err(e) = inner.repos.notifications.update(&notification).await {
                    error!(error = %e, "failed to persist retry state");
                }
            }
            let retry_item = QueueItem {
                notification_id: notification.notification_id.clone(),
                priority: notification.priority,
                retry_count: notification.retry_count,
                enqueued_at: Utc::now(),
            };
            warn!(
                notification_id = %notification.notification_id,
                provider = response.provider,
                error_type = ?response.error_kind,
                retry = notification.retry_count,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "transient provider failure, retry scheduled"
            );
            if let Err(e) = inner.queue.enqueue_retry(retry_item, delay).await {
                error!(error = %e, "failed to park retry item");
            }
        }
    }
}

async fn requeue_after_store_error(inner: &Inner, notification: Notification, item: QueueItem) {
    // Store reads are transient failures: revert to queued and park the item.
    let mut notification = notification;
    if notification.transition(NotificationStatus::Queued).is_ok() {
        let _ = inner.repos.notifications.update(&notification).await;
    }
    let delay = Duration::from_secs(inner.config.backoff_base_secs);
    if let Err(e) = inner.queue.enqueue_retry(item, delay).await {
        error!(error = %e, "failed to park item after store error");
    }
}

async fn dead_letter(inner: &Inner, mut notification: Notification, item: QueueItem, reason: &str) {
    if notification.fail(reason).is_ok() {
        if let Err(e) = inner.repos.notifications.update(&notification).await {
            error!(error = %e, "failed to persist failed status");
        }
    }
    let mut dlq_item = item;
    dlq_item.retry_count = notification.retry_count;
    if let Err(e) = inner.queue.enqueue_deadletter(dlq_item, reason).await {
        error!(error = %e, "failed to dead-letter item");
    }
    error!(
        notification_id = %notification.notification_id,
        reason,
        "notification dead-lettered"
    );
}

async fn schedule_recurrence(inner: &Inner, notification: &Notification) {
    let Some(recurrence) = &notification.recurrence else {
        return;
    };
    let rule = match RecurrenceRule::parse(&recurrence.rule) {
        Ok(rule) => rule,
        Err(e) => {
            warn!(
                notification_id = %notification.notification_id,
                rule = %recurrence.rule,
                error = %e,
                "unparseable recurrence rule, stopping the series"
            );
            return;
        }
    };
    // Next run is strictly after this run's send time.
    let after = notification.sent_at.unwrap_or_else(Utc::now);
    let next_run = rule.next_run(after);
    let Some(successor) = notification.recurrence_successor(next_run) else {
        debug!(
            notification_id = %notification.notification_id,
            "recurrence series complete"
        );
        return;
    };

    if let Err(e) = inner.repos.notifications.create(&successor).await {
        error!(error = %e, "failed to persist recurrence successor");
        return;
    }
    let item = QueueItem::for_notification(&successor);
    if let Err(e) = inner.queue.enqueue_scheduled(item, next_run).await {
        // The document is pending with a due date; the scheduler resync
        // will pick it up even though the delayed enqueue failed.
        warn!(error = %e, "failed to park recurrence successor, resync will recover it");
    }
    info!(
        notification_id = %notification.notification_id,
        successor_id = %successor.notification_id,
        next_run = %next_run,
        occurrence = successor.recurrence.as_ref().map(|r| r.current_count).unwrap_or(0),
        "recurrence successor scheduled"
    );
}
