//! Notification service: the single ingress for notification work.
//!
//! Orchestrates validation, template rendering, admission policy,
//! persistence, and queueing. Persistence order matters: documents are
//! written as `pending` first and only flipped to `queued` once the queue
//! accepted the item, so a queue outage degrades to delayed delivery (the
//! scheduler resync re-queues pending documents) instead of losing work.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use freerange_core::template::TemplateRenderer;
use freerange_core::{
    AdmissionRequest, Application, Channel, Notification, NotificationContent,
    NotificationStatus, NotifyError, NotifyResult, Priority, QueueItem, QuotaCounter,
    RecurrenceRule, RecurrenceState,
};
use freerange_store::{DocQuery, Repositories, SortOrder};
use freerange_delivery::queue::NotificationQueue;

/// Shared payload of a send request; `SendRequest` and `BulkSendRequest`
/// wrap it with one or many user ids.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationPayload {
    pub channel: Channel,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
    #[serde(default)]
    pub template_id: Option<String>,
    /// Variables for template rendering; merged over `data`.
    #[serde(default)]
    pub template_data: Option<Value>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecurrenceRequest {
    pub rule: String,
    pub max_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendRequest {
    pub user_id: String,
    #[serde(flatten)]
    pub payload: NotificationPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkSendRequest {
    pub user_ids: Vec<String>,
    #[serde(flatten)]
    pub payload: NotificationPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub channel: Option<Channel>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: Option<NotificationStatus>,
    #[serde(default)]
    pub from_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub page_size: Option<u64>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub items: Vec<Notification>,
    pub page: u64,
    pub page_size: u64,
    pub total: u64,
}

#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub accepted: Vec<Notification>,
    pub rejected: Vec<BatchRejection>,
}

#[derive(Debug, Serialize)]
pub struct BatchRejection {
    pub index: usize,
    pub user_id: String,
    pub code: String,
    pub message: String,
}

const MAX_PAGE_SIZE: u64 = 100;
const DEFAULT_PAGE_SIZE: u64 = 50;

pub struct NotificationService {
    repos: Repositories,
    queue: Arc<dyn NotificationQueue>,
    quota: Arc<dyn QuotaCounter>,
    policy: freerange_core::PolicyEvaluator,
    renderer: Arc<dyn TemplateRenderer>,
}

impl NotificationService {
    pub fn new(
        repos: Repositories,
        queue: Arc<dyn NotificationQueue>,
        quota: Arc<dyn QuotaCounter>,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Self {
        Self {
            repos,
            queue,
            quota,
            policy: freerange_core::PolicyEvaluator::new(),
            renderer,
        }
    }

    /// Admit, persist, and queue a single notification. Policy rejections
    /// happen before persistence: a rejected request leaves no document.
    pub async fn send(&self, app: &Application, request: SendRequest) -> NotifyResult<Notification> {
        if request.user_id.trim().is_empty() {
            return Err(NotifyError::validation("user_id is required"));
        }
        let payload = &request.payload;
        let priority = payload.priority.unwrap_or_default();

        if let Some(recurrence) = &payload.recurrence {
            RecurrenceRule::parse(&recurrence.rule)?;
            if recurrence.max_count == 0 {
                return Err(NotifyError::validation("recurrence.max_count must be at least 1"));
            }
        }

        let user = self
            .repos
            .users
            .get_in_app(&app.app_id, &request.user_id)
            .await
            .map_err(|e| match e {
                freerange_store::StoreError::NotFound { .. } => {
                    freerange_core::PolicyRejection::UserNotFound.into()
                }
                other => NotifyError::from(other),
            })?;

        let content = self.render_content(app, payload).await?;
        if content.title.is_empty() && content.body.is_empty() {
            return Err(NotifyError::validation(
                "content requires a title or body (or a template_id)",
            ));
        }

        let admission = AdmissionRequest {
            channel: payload.channel,
            priority,
            category: payload.category.as_deref(),
        };
        self.policy
            .evaluate(app, &user, &admission, self.quota.as_ref(), Utc::now())
            .await
            .map_err(|e| {
                info!(
                    app_id = %app.app_id,
                    user_id = %request.user_id,
                    channel = %payload.channel,
                    reason = %e,
                    "admission rejected"
                );
                e
            })?;

        let mut notification = Notification::new(
            app.app_id.clone(),
            request.user_id.clone(),
            payload.channel,
            priority,
            content,
        );
        notification.template_id = payload.template_id.clone();
        notification.category = payload.category.clone();
        notification.scheduled_at = payload.scheduled_at;
        if let Some(recurrence) = &payload.recurrence {
            notification.recurrence = Some(RecurrenceState {
                rule: recurrence.rule.clone(),
                current_count: 0,
                max_count: recurrence.max_count,
            });
        }

        // Interval recurrences without an explicit schedule fire their
        // first occurrence immediately; successors are spaced by the rule.
        let now = Utc::now();
        let future_schedule = notification.scheduled_at.filter(|at| *at > now);

        self.repos.notifications.create(&notification).await?;

        if let Some(ready_at) = future_schedule {
            if let Err(e) = self
                .queue
                .enqueue_scheduled(QueueItem::for_notification(&notification), ready_at)
                .await
            {
                // The document is pending with a due date; the scheduler
                // resync recovers it.
                warn!(
                    notification_id = %notification.notification_id,
                    error = %e,
                    "delayed enqueue failed, relying on scheduler resync"
                );
            }
        } else {
            match self
                .queue
                .enqueue(QueueItem::for_notification(&notification))
                .await
            {
                Ok(()) => {
                    notification.transition(NotificationStatus::Queued)?;
                    self.repos.notifications.update(&notification).await?;
                }
                Err(e) => {
                    warn!(
                        notification_id = %notification.notification_id,
                        error = %e,
                        "enqueue failed, document left pending for resync"
                    );
                }
            }
        }

        info!(
            notification_id = %notification.notification_id,
            app_id = %app.app_id,
            user_id = %notification.user_id,
            channel = %notification.channel,
            priority = %notification.priority,
            status = %notification.status,
            "notification admitted"
        );
        Ok(notification)
    }

    /// Same payload fanned out to many users. Per-user policy failures are
    /// logged and skipped; partial success is the contract.
    pub async fn send_bulk(
        &self,
        app: &Application,
        request: BulkSendRequest,
    ) -> NotifyResult<BatchOutcome> {
        if request.user_ids.is_empty() {
            return Err(NotifyError::validation("user_ids must not be empty"));
        }
        let mut outcome = BatchOutcome {
            accepted: Vec::new(),
            rejected: Vec::new(),
        };
        for (index, user_id) in request.user_ids.iter().enumerate() {
            let send = SendRequest {
                user_id: user_id.clone(),
                payload: request.payload.clone(),
            };
            match self.send(app, send).await {
                Ok(notification) => outcome.accepted.push(notification),
                Err(e) => {
                    outcome.rejected.push(BatchRejection {
                        index,
                        user_id: user_id.clone(),
                        code: e.code().as_str().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(outcome)
    }

    /// Heterogeneous batch; each entry admitted independently.
    pub async fn send_batch(
        &self,
        app: &Application,
        requests: Vec<SendRequest>,
    ) -> NotifyResult<BatchOutcome> {
        if requests.is_empty() {
            return Err(NotifyError::validation("requests must not be empty"));
        }
        let mut outcome = BatchOutcome {
            accepted: Vec::new(),
            rejected: Vec::new(),
        };
        for (index, request) in requests.into_iter().enumerate() {
            let user_id = request.user_id.clone();
            match self.send(app, request).await {
                Ok(notification) => outcome.accepted.push(notification),
                Err(e) => outcome.rejected.push(BatchRejection {
                    index,
                    user_id,
                    code: e.code().as_str().to_string(),
                    message: e.to_string(),
                }),
            }
        }
        Ok(outcome)
    }

    /// Tenant-scoped read. Another tenant's notification reads as absent.
    pub async fn get(&self, app_id: &str, id: &str) -> NotifyResult<Notification> {
        let notification = self.repos.notifications.get_by_id(id).await?;
        if notification.app_id != app_id {
            return Err(NotifyError::not_found("notification"));
        }
        Ok(notification)
    }

    pub async fn list(&self, app_id: &str, query: ListQuery) -> NotifyResult<ListResponse> {
        let page = query.page.unwrap_or(1).max(1);
        let page_size = query
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let sort_by = query.sort_by.as_deref().unwrap_or("created_at");
        let order = match query.sort_order.as_deref() {
            Some("asc") => SortOrder::Asc,
            Some("desc") | None => SortOrder::Desc,
            Some(other) => {
                return Err(NotifyError::validation(format!(
                    "invalid sort_order {:?} (expected asc or desc)",
                    other
                )))
            }
        };

        let mut doc_query = DocQuery::new()
            .term("app_id", app_id)
            .paginate((page - 1) * page_size, page_size)
            .sort(sort_by, order);
        if let Some(user_id) = &query.user_id {
            doc_query = doc_query.term("user_id", user_id.as_str());
        }
        if let Some(channel) = query.channel {
            doc_query = doc_query.term("channel", channel.as_str());
        }
        if let Some(priority) = query.priority {
            doc_query = doc_query.term("priority", priority.as_str());
        }
        if let Some(status) = query.status {
            doc_query = doc_query.term("status", status.as_str());
        }
        if query.from_date.is_some() || query.to_date.is_some() {
            doc_query = doc_query.range(
                "created_at",
                query.from_date.map(|d| Value::String(d.to_rfc3339())),
                query.to_date.map(|d| Value::String(d.to_rfc3339())),
            );
        }

        let items = self.repos.notifications.search(&doc_query).await?;
        let total = self.repos.notifications.count(&doc_query).await?;
        Ok(ListResponse {
            items,
            page,
            page_size,
            total,
        })
    }

    /// Admin/webhook status update. Transitions from final states are
    /// rejected, except the one sanctioned mutation `delivered -> read`.
    pub async fn update_status(
        &self,
        app_id: &str,
        id: &str,
        status: NotificationStatus,
        error_message: Option<String>,
    ) -> NotifyResult<Notification> {
        let mut notification = self.get(app_id, id).await?;
        if notification.status.is_final()
            && !(notification.status == NotificationStatus::Delivered
                && status == NotificationStatus::Read)
        {
            return Err(NotifyError::InvalidTransition {
                from: notification.status,
                to: status,
            });
        }
        notification.transition(status)?;
        if let Some(message) = error_message {
            notification.error_message = Some(message);
        }
        self.repos.notifications.update(&notification).await?;
        Ok(notification)
    }

    pub async fn cancel(&self, app_id: &str, id: &str) -> NotifyResult<Notification> {
        let mut notification = self.get(app_id, id).await?;
        if matches!(
            notification.status,
            NotificationStatus::Sent
                | NotificationStatus::Delivered
                | NotificationStatus::Read
                | NotificationStatus::Failed
                | NotificationStatus::Cancelled
        ) {
            return Err(NotifyError::InvalidTransition {
                from: notification.status,
                to: NotificationStatus::Cancelled,
            });
        }
        notification.transition(NotificationStatus::Cancelled)?;
        self.repos.notifications.update(&notification).await?;
        info!(notification_id = %id, "notification cancelled");
        Ok(notification)
    }

    /// Cancel the eligible subset; ineligible or foreign ids are skipped.
    pub async fn cancel_batch(&self, app_id: &str, ids: &[String]) -> NotifyResult<Vec<String>> {
        let mut cancelled = Vec::new();
        for id in ids {
            match self.cancel(app_id, id).await {
                Ok(_) => cancelled.push(id.clone()),
                Err(NotifyError::NotFound { .. }) | Err(NotifyError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(cancelled)
    }

    /// Operator-forced retry of a failed notification.
    pub async fn retry(&self, app_id: &str, id: &str) -> NotifyResult<Notification> {
        let mut notification = self.get(app_id, id).await?;
        if notification.status != NotificationStatus::Failed {
            return Err(NotifyError::InvalidTransition {
                from: notification.status,
                to: NotificationStatus::Queued,
            });
        }
        let app = self.repos.applications.get_by_id(app_id).await?;
        if notification.retry_count >= app.settings.retry_attempts {
            return Err(NotifyError::MaxRetriesExceeded);
        }
        notification.retry_count += 1;
        notification.transition(NotificationStatus::Queued)?;
        notification.error_message = None;
        self.repos.notifications.update(&notification).await?;
        self.queue
            .enqueue(QueueItem::for_notification(&notification))
            .await
            .map_err(NotifyError::from)?;
        info!(
            notification_id = %id,
            retry = notification.retry_count,
            "notification re-queued by operator"
        );
        Ok(notification)
    }

    /// Bulk `delivered -> read`; ids not owned by the app/user or not in
    /// the delivered state are ignored. Idempotent: the first read's
    /// timestamp sticks.
    pub async fn mark_read(
        &self,
        app_id: &str,
        user_id: &str,
        ids: &[String],
    ) -> NotifyResult<u64> {
        let mut updated = 0;
        for id in ids {
            let mut notification = match self.repos.notifications.get_by_id(id).await {
                Ok(n) => n,
                Err(freerange_store::StoreError::NotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            if notification.app_id != app_id || notification.user_id != user_id {
                continue;
            }
            if notification.status != NotificationStatus::Delivered {
                continue;
            }
            notification.transition(NotificationStatus::Read)?;
            self.repos.notifications.update(&notification).await?;
            updated += 1;
        }
        Ok(updated)
    }

    pub async fn unread_count(&self, app_id: &str, user_id: &str) -> NotifyResult<u64> {
        Ok(self.repos.notifications.count_unread(app_id, user_id).await?)
    }

    pub async fn unread_list(
        &self,
        app_id: &str,
        user_id: &str,
        limit: usize,
    ) -> NotifyResult<Vec<Notification>> {
        Ok(self
            .repos
            .notifications
            .list_unread(app_id, user_id, limit.min(MAX_PAGE_SIZE as usize))
            .await?)
    }

    /// Resolve the content: explicit title/body, or a rendered template.
    /// The application's default template fills in when the request names
    /// neither content nor template.
    async fn render_content(
        &self,
        app: &Application,
        payload: &NotificationPayload,
    ) -> NotifyResult<NotificationContent> {
        let template_id = payload.template_id.clone().or_else(|| {
            let no_inline = payload.title.is_none() && payload.body.is_none();
            no_inline
                .then(|| app.settings.default_template_id.clone())
                .flatten()
        });

        let mut content = match template_id {
            Some(template_id) => {
                let template = self
                    .repos
                    .templates
                    .get_in_app(&app.app_id, &template_id)
                    .await
                    .map_err(|e| match e {
                        freerange_store::StoreError::NotFound { .. } => {
                            NotifyError::validation(format!("unknown template {:?}", template_id))
                        }
                        other => NotifyError::from(other),
                    })?;
                let mut vars = serde_json::Map::new();
                for (key, value) in &payload.data {
                    vars.insert(key.clone(), value.clone());
                }
                if let Some(Value::Object(extra)) = &payload.template_data {
                    for (key, value) in extra {
                        vars.insert(key.clone(), value.clone());
                    }
                }
                self.renderer.render(&template, &Value::Object(vars))?
            }
            None => NotificationContent {
                title: payload.title.clone().unwrap_or_default(),
                body: payload.body.clone().unwrap_or_default(),
                data: Default::default(),
            },
        };
        content.data = payload.data.clone();
        Ok(content)
    }
}
