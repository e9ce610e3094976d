//! End-to-end pipeline tests over the in-memory backends: admission,
//! queueing, scheduling, worker dispatch, retries, dead-lettering,
//! recurrence, and the check-in flush.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use freerange_api::service::{
    BulkSendRequest, NotificationPayload, NotificationService, SendRequest,
};
use freerange_core::config::WorkerConfig;
use freerange_core::template::HandlebarsRenderer;
use freerange_core::{
    Application, Channel, Notification, NotificationStatus, NotifyError, Preferences, Priority,
    QuietHours, User,
};
use freerange_delivery::providers::{
    Provider, ProviderErrorKind, ProviderResponse, StreamProvider,
};
use freerange_delivery::queue::{MemoryQueue, NotificationQueue};
use freerange_delivery::{Broadcaster, MemoryRateLimiter, ProviderManager, Scheduler, WorkerPool};
use freerange_store::{
    ApplicationRepository, MemoryStore, NotificationRepository, Repositories, UserRepository,
};

struct ScriptedProvider {
    channel: Channel,
    responses: Mutex<VecDeque<ProviderResponse>>,
    calls: Mutex<u32>,
}

impl ScriptedProvider {
    fn new(channel: Channel, responses: Vec<ProviderResponse>) -> Self {
        Self {
            channel,
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(0),
        }
    }

    async fn call_count(&self) -> u32 {
        *self.calls.lock().await
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        _notification: &Notification,
        _user: &User,
        _app: &Application,
    ) -> ProviderResponse {
        *self.calls.lock().await += 1;
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| ProviderResponse::ok("scripted"))
    }
}

struct Pipeline {
    store: Arc<MemoryStore>,
    queue: Arc<MemoryQueue>,
    service: NotificationService,
    pool: WorkerPool,
    scheduler: Scheduler,
    broadcaster: Arc<Broadcaster>,
    push: Arc<ScriptedProvider>,
    app: Application,
}

async fn pipeline(push_responses: Vec<ProviderResponse>, retry_attempts: u32) -> Pipeline {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let limiter = Arc::new(MemoryRateLimiter::new());

    let mut app = Application::new("acme", "key-1");
    app.settings.retry_attempts = retry_attempts;
    ApplicationRepository::create(store.as_ref(), &app).await.unwrap();

    let repos = Repositories {
        notifications: store.clone(),
        users: store.clone(),
        applications: store.clone(),
        templates: store.clone(),
    };

    let broadcaster = Arc::new(Broadcaster::new(store.clone(), Default::default()));
    let push = Arc::new(ScriptedProvider::new(Channel::Push, push_responses));
    let mut manager = ProviderManager::new();
    manager.register(push.clone());
    manager.register(Arc::new(StreamProvider::new(
        broadcaster.clone(),
        Channel::InApp,
    )));
    let manager = Arc::new(manager);

    let service = NotificationService::new(
        repos.clone(),
        queue.clone(),
        limiter,
        Arc::new(HandlebarsRenderer::new()),
    );

    let mut worker_config = WorkerConfig::default();
    worker_config.backoff_base_secs = 0;
    let pool = WorkerPool::new(
        queue.clone(),
        repos.clone(),
        manager.clone(),
        worker_config,
        Duration::from_millis(10),
    );
    let scheduler = Scheduler::new(queue.clone(), repos, Duration::from_millis(20), 100);

    Pipeline {
        store,
        queue,
        service,
        pool,
        scheduler,
        broadcaster,
        push,
        app,
    }
}

async fn add_user(p: &Pipeline, user_id: &str, preferences: Preferences) -> User {
    let now = Utc::now();
    let user = User {
        user_id: user_id.to_string(),
        app_id: p.app.app_id.clone(),
        external_user_id: None,
        email: Some(format!("{}@example.com", user_id)),
        phone: None,
        timezone: Some("America/New_York".to_string()),
        language: None,
        webhook_url: None,
        devices: Vec::new(),
        preferences,
        created_at: now,
        updated_at: now,
    };
    UserRepository::create(p.store.as_ref(), &user).await.unwrap();
    user
}

fn push_request(user_id: &str, priority: Priority) -> SendRequest {
    SendRequest {
        user_id: user_id.to_string(),
        payload: NotificationPayload {
            channel: Channel::Push,
            priority: Some(priority),
            title: Some("Hi".to_string()),
            body: Some("Hello".to_string()),
            data: Default::default(),
            template_id: None,
            template_data: None,
            category: None,
            scheduled_at: None,
            recurrence: None,
        },
    }
}

async fn stored(p: &Pipeline, id: &str) -> Notification {
    NotificationRepository::get_by_id(p.store.as_ref(), id).await.unwrap()
}

#[tokio::test]
async fn happy_path_push_is_sent_once() {
    let p = pipeline(vec![ProviderResponse::ok("scripted")], 3).await;
    add_user(&p, "u1", Preferences::default()).await;

    let accepted = p
        .service
        .send(&p.app, push_request("u1", Priority::Normal))
        .await
        .unwrap();
    assert_eq!(accepted.status, NotificationStatus::Queued);

    assert!(p.pool.process_next().await);

    let after = stored(&p, &accepted.notification_id).await;
    assert_eq!(after.status, NotificationStatus::Sent);
    assert!(after.sent_at.is_some());
    assert_eq!(p.push.call_count().await, 1);
}

#[tokio::test]
async fn quiet_hours_reject_normal_but_admit_critical() {
    let p = pipeline(vec![], 3).await;
    // A window straddling the current time in the user's zone.
    let now_ny = Utc::now().with_timezone(&chrono_tz::America::New_York);
    let quiet = QuietHours {
        start: (now_ny - chrono::Duration::hours(1)).format("%H:%M").to_string(),
        end: (now_ny + chrono::Duration::hours(1)).format("%H:%M").to_string(),
    };
    add_user(
        &p,
        "u1",
        Preferences {
            quiet_hours: Some(quiet),
            ..Default::default()
        },
    )
    .await;

    let err = p
        .service
        .send(&p.app, push_request("u1", Priority::Normal))
        .await
        .unwrap_err();
    assert_eq!(err.code().as_str(), "QUIET_HOURS");

    // No document persisted for the rejected admission.
    let all = NotificationRepository::search(
        p.store.as_ref(),
        &freerange_store::DocQuery::new().term("app_id", p.app.app_id.clone()),
    )
    .await
    .unwrap();
    assert!(all.is_empty());

    p.service
        .send(&p.app, push_request("u1", Priority::Critical))
        .await
        .expect("critical bypasses quiet hours");
}

#[tokio::test]
async fn transient_failures_retry_then_dead_letter() {
    let transient =
        || ProviderResponse::failure("scripted", ProviderErrorKind::Transient, "timeout");
    let p = pipeline(vec![transient(), transient(), transient()], 2).await;
    add_user(&p, "u1", Preferences::default()).await;

    let accepted = p
        .service
        .send(&p.app, push_request("u1", Priority::Normal))
        .await
        .unwrap();

    // Pump the pipeline: worker attempt, then scheduler promotes the
    // zero-delay retry, until the item dead-letters.
    for _ in 0..3 {
        assert!(p.pool.process_next().await);
        p.scheduler.run_once().await;
    }

    let after = stored(&p, &accepted.notification_id).await;
    assert_eq!(after.status, NotificationStatus::Failed);
    assert_eq!(after.retry_count, 3);

    let dlq = p.queue.list_dlq(10).await.unwrap();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].item.notification_id, accepted.notification_id);
    assert!(dlq[0].reason.contains("max retries"));
}

#[tokio::test]
async fn scheduled_delivery_promotes_after_due_time() {
    let p = pipeline(vec![ProviderResponse::ok("scripted")], 3).await;
    add_user(&p, "u1", Preferences::default()).await;

    let mut request = push_request("u1", Priority::Normal);
    request.payload.scheduled_at = Some(Utc::now() + chrono::Duration::milliseconds(60));
    let accepted = p.service.send(&p.app, request).await.unwrap();
    assert_eq!(accepted.status, NotificationStatus::Pending);

    // Not yet in the priority queues.
    p.scheduler.run_once().await;
    assert!(!p.pool.process_next().await);

    tokio::time::sleep(Duration::from_millis(80)).await;
    p.scheduler.run_once().await;
    assert!(p.pool.process_next().await);

    let after = stored(&p, &accepted.notification_id).await;
    assert_eq!(after.status, NotificationStatus::Sent);
}

#[tokio::test]
async fn recurrence_successor_follows_sent_at() {
    let p = pipeline(vec![ProviderResponse::ok("scripted")], 3).await;
    add_user(&p, "u1", Preferences::default()).await;

    let mut request = push_request("u1", Priority::Normal);
    request.payload.recurrence = Some(freerange_api::service::RecurrenceRequest {
        rule: "5s".to_string(),
        max_count: 3,
    });
    let first = p.service.send(&p.app, request).await.unwrap();
    // Without an explicit schedule the first occurrence dispatches now.
    assert_eq!(first.status, NotificationStatus::Queued);

    assert!(p.pool.process_next().await);
    let first_after = stored(&p, &first.notification_id).await;
    assert_eq!(first_after.status, NotificationStatus::Sent);

    let all = NotificationRepository::search(
        p.store.as_ref(),
        &freerange_store::DocQuery::new().term("user_id", "u1").paginate(0, 10),
    )
    .await
    .unwrap();
    assert_eq!(all.len(), 2);
    let successor = all
        .iter()
        .find(|n| n.notification_id != first.notification_id)
        .expect("successor document");
    assert_eq!(successor.status, NotificationStatus::Pending);
    assert!(successor.scheduled_at.unwrap() > first_after.sent_at.unwrap());
    assert_eq!(successor.content, first_after.content);
    assert_eq!(successor.recurrence.as_ref().unwrap().current_count, 1);
}

#[tokio::test]
async fn check_in_flush_delivers_queued_in_order() {
    let p = pipeline(vec![], 3).await;
    add_user(&p, "u1", Preferences::default()).await;

    // Two in-app notifications with nobody connected: the worker leaves
    // them queued.
    let mut ids = Vec::new();
    for i in 0..2 {
        let mut request = push_request("u1", Priority::Normal);
        request.payload.channel = Channel::InApp;
        request.payload.title = Some(format!("msg {}", i));
        let n = p.service.send(&p.app, request).await.unwrap();
        ids.push(n.notification_id.clone());
        assert!(p.pool.process_next().await);
        assert_eq!(
            stored(&p, &n.notification_id).await.status,
            NotificationStatus::Queued
        );
        // Keep created_at strictly ordered.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (_conn, mut rx) = p.broadcaster.subscribe("u1").await;
    let flushed = p
        .broadcaster
        .flush_queued(&p.app.app_id, "u1")
        .await
        .unwrap();
    assert_eq!(flushed, 2);

    for expected_id in &ids {
        let frame: serde_json::Value =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "notification");
        assert_eq!(
            frame["notification"]["notification_id"],
            serde_json::json!(expected_id)
        );
    }
    for id in &ids {
        assert_eq!(stored(&p, id).await.status, NotificationStatus::Sent);
    }
}

#[tokio::test]
async fn bulk_send_is_partial_success() {
    let p = pipeline(vec![], 3).await;
    add_user(&p, "ok-user", Preferences::default()).await;
    add_user(
        &p,
        "dnd-user",
        Preferences {
            dnd: true,
            ..Default::default()
        },
    )
    .await;

    let outcome = p
        .service
        .send_bulk(
            &p.app,
            BulkSendRequest {
                user_ids: vec![
                    "ok-user".to_string(),
                    "dnd-user".to_string(),
                    "missing".to_string(),
                ],
                payload: push_request("x", Priority::Normal).payload,
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.accepted.len(), 1);
    assert_eq!(outcome.accepted[0].user_id, "ok-user");
    assert_eq!(outcome.rejected.len(), 2);
    let codes: Vec<&str> = outcome.rejected.iter().map(|r| r.code.as_str()).collect();
    assert!(codes.contains(&"DND_ENABLED"));
    assert!(codes.contains(&"NOT_FOUND"));
}

#[tokio::test]
async fn tenant_isolation_on_reads() {
    let p = pipeline(vec![], 3).await;
    add_user(&p, "u1", Preferences::default()).await;
    let accepted = p
        .service
        .send(&p.app, push_request("u1", Priority::Normal))
        .await
        .unwrap();

    let err = p
        .service
        .get("other-app", &accepted.notification_id)
        .await
        .unwrap_err();
    assert!(matches!(err, NotifyError::NotFound { .. }));
}

#[tokio::test]
async fn cancel_is_not_repeatable() {
    let p = pipeline(vec![], 3).await;
    add_user(&p, "u1", Preferences::default()).await;
    let accepted = p
        .service
        .send(&p.app, push_request("u1", Priority::Normal))
        .await
        .unwrap();

    let cancelled = p.service.cancel(&p.app.app_id, &accepted.notification_id).await.unwrap();
    assert_eq!(cancelled.status, NotificationStatus::Cancelled);

    let err = p
        .service
        .cancel(&p.app.app_id, &accepted.notification_id)
        .await
        .unwrap_err();
    assert!(matches!(err, NotifyError::InvalidTransition { .. }));
}

#[tokio::test]
async fn mark_read_is_idempotent() {
    let p = pipeline(vec![], 3).await;
    add_user(&p, "u1", Preferences::default()).await;
    let mut request = push_request("u1", Priority::Normal);
    request.payload.channel = Channel::InApp;
    let accepted = p.service.send(&p.app, request).await.unwrap();

    p.service
        .update_status(&p.app.app_id, &accepted.notification_id, NotificationStatus::Sent, None)
        .await
        .unwrap();
    p.service
        .update_status(
            &p.app.app_id,
            &accepted.notification_id,
            NotificationStatus::Delivered,
            None,
        )
        .await
        .unwrap();

    let ids = vec![accepted.notification_id.clone()];
    let updated = p.service.mark_read(&p.app.app_id, "u1", &ids).await.unwrap();
    assert_eq!(updated, 1);
    let first_read_at = stored(&p, &accepted.notification_id).await.read_at;
    assert!(first_read_at.is_some());

    let updated = p.service.mark_read(&p.app.app_id, "u1", &ids).await.unwrap();
    assert_eq!(updated, 0);
    assert_eq!(stored(&p, &accepted.notification_id).await.read_at, first_read_at);
}

#[tokio::test]
async fn retry_endpoint_requeues_failed_notification() {
    let p = pipeline(
        vec![
            ProviderResponse::failure("scripted", ProviderErrorKind::Permanent, "boom"),
            ProviderResponse::ok("scripted"),
        ],
        3,
    )
    .await;
    add_user(&p, "u1", Preferences::default()).await;
    let accepted = p
        .service
        .send(&p.app, push_request("u1", Priority::Normal))
        .await
        .unwrap();

    assert!(p.pool.process_next().await);
    assert_eq!(
        stored(&p, &accepted.notification_id).await.status,
        NotificationStatus::Failed
    );

    let retried = p
        .service
        .retry(&p.app.app_id, &accepted.notification_id)
        .await
        .unwrap();
    assert_eq!(retried.status, NotificationStatus::Queued);
    assert_eq!(retried.retry_count, 1);

    assert!(p.pool.process_next().await);
    assert_eq!(
        stored(&p, &accepted.notification_id).await.status,
        NotificationStatus::Sent
    );
}
