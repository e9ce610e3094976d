//! The notification entity and its lifecycle state machine.
//!
//! A notification is the unit of work flowing through the delivery pipeline.
//! Its `status` may only move forward through the state machine encoded in
//! [`NotificationStatus::can_transition_to`]; the timestamp bookkeeping for
//! each transition lives in [`Notification::transition`] so that every writer
//! (service ingress, worker pool, broadcaster flush) applies the same rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::NotifyError;

/// Delivery pathway for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Push,
    Email,
    Sms,
    Webhook,
    InApp,
    Stream,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Push => "push",
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Webhook => "webhook",
            Channel::InApp => "in_app",
            Channel::Stream => "stream",
        }
    }

    pub fn parse(s: &str) -> Option<Channel> {
        match s {
            "push" => Some(Channel::Push),
            "email" => Some(Channel::Email),
            "sms" => Some(Channel::Sms),
            "webhook" => Some(Channel::Webhook),
            "in_app" => Some(Channel::InApp),
            "stream" => Some(Channel::Stream),
            _ => None,
        }
    }

    /// Channels delivered through the in-process broadcaster rather than an
    /// external provider call.
    pub fn is_realtime(&self) -> bool {
        matches!(self, Channel::InApp | Channel::Stream)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch priority. Ordering is `Critical > High > Normal > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// All levels, highest first. Dequeue order for the priority queues.
    pub const DESCENDING: [Priority; 4] =
        [Priority::Critical, Priority::High, Priority::Normal, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Priority> {
        match s {
            "low" => Some(Priority::Low),
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            "critical" => Some(Priority::Critical),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Queued,
    Processing,
    Sent,
    Delivered,
    Read,
    Failed,
    Cancelled,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Queued => "queued",
            NotificationStatus::Processing => "processing",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Read => "read",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<NotificationStatus> {
        match s {
            "pending" => Some(NotificationStatus::Pending),
            "queued" => Some(NotificationStatus::Queued),
            "processing" => Some(NotificationStatus::Processing),
            "sent" => Some(NotificationStatus::Sent),
            "delivered" => Some(NotificationStatus::Delivered),
            "read" => Some(NotificationStatus::Read),
            "failed" => Some(NotificationStatus::Failed),
            "cancelled" => Some(NotificationStatus::Cancelled),
        _ => None,
        }
    }

    /// Final states admit no further transitions, with one exception:
    /// `delivered -> read`, and the operator retry path `failed -> queued`.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            NotificationStatus::Delivered
                | NotificationStatus::Read
                | NotificationStatus::Failed
                | NotificationStatus::Cancelled
        )
    }

    /// Forward-only state machine.
    pub fn can_transition_to(&self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;
        match (self, next) {
            (Pending, Queued) | (Pending, Processing) | (Pending, Sent) | (Pending, Failed)
            | (Pending, Cancelled) => true,
            (Queued, Processing) | (Queued, Sent) | (Queued, Failed) | (Queued, Cancelled) => true,
            // Transient provider failures put the item back in line.
            (Processing, Queued) => true,
            (Processing, Sent) | (Processing, Failed) | (Processing, Cancelled) => true,
            (Sent, Delivered) => true,
            (Delivered, Read) => true,
            // Operator-forced retry of a failed notification.
            (Failed, Queued) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendered payload. `data` is an opaque map preserved verbatim through
/// persistence and the wire; the core never interprets it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// Recurrence bookkeeping carried on a notification document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceState {
    /// Interval rule, e.g. `"30s"`, `"5m"`, `"2h"`, `"1d"`.
    pub rule: String,
    #[serde(default)]
    pub current_count: u32,
    pub max_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: String,
    pub app_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    pub channel: Channel,
    pub priority: Priority,
    pub status: NotificationStatus,
    pub content: NotificationContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<RecurrenceState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Construct a new notification in `pending` state with a fresh id.
    pub fn new(
        app_id: impl Into<String>,
        user_id: impl Into<String>,
        channel: Channel,
        priority: Priority,
        content: NotificationContent,
    ) -> Self {
        let now = Utc::now();
        Self {
            notification_id: Uuid::new_v4().to_string(),
            app_id: app_id.into(),
            user_id: user_id.into(),
            template_id: None,
            channel,
            priority,
            status: NotificationStatus::Pending,
            content,
            category: None,
            scheduled_at: None,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            failed_at: None,
            error_message: None,
            retry_count: 0,
            recurrence: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a state transition, enforcing the state machine and setting the
    /// per-transition timestamps.
    pub fn transition(&mut self, next: NotificationStatus) -> Result<(), NotifyError> {
        if !self.status.can_transition_to(next) {
            return Err(NotifyError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        match next {
            NotificationStatus::Sent => self.sent_at = Some(now),
            NotificationStatus::Delivered => self.delivered_at = Some(now),
            NotificationStatus::Read => {
                // Idempotent: the first read wins.
                if self.read_at.is_none() {
                    self.read_at = Some(now);
                }
            }
            NotificationStatus::Failed => self.failed_at = Some(now),
            _ => {}
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Transition to `failed` with an error message.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), NotifyError> {
        self.transition(NotificationStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Clone the content and recurrence into a fresh successor document for
    /// the next recurrence run. The successor starts `pending` with a new id
    /// and a zeroed retry count.
    pub fn recurrence_successor(&self, scheduled_at: DateTime<Utc>) -> Option<Notification> {
        let rec = self.recurrence.as_ref()?;
        if rec.current_count + 1 >= rec.max_count {
            return None;
        }
        let mut next = Notification::new(
            self.app_id.clone(),
            self.user_id.clone(),
            self.channel,
            self.priority,
            self.content.clone(),
        );
        next.template_id = self.template_id.clone();
        next.category = self.category.clone();
        next.scheduled_at = Some(scheduled_at);
        next.recurrence = Some(RecurrenceState {
            rule: rec.rule.clone(),
            current_count: rec.current_count + 1,
            max_count: rec.max_count,
        });
        Some(next)
    }
}

/// Payload placed on the queues. Deliberately small: workers refetch the full
/// document by id, so queued state can never go stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub notification_id: String,
    pub priority: Priority,
    #[serde(default)]
    pub retry_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn for_notification(n: &Notification) -> Self {
        Self {
            notification_id: n.notification_id.clone(),
            priority: n.priority,
            retry_count: n.retry_count,
            enqueued_at: Utc::now(),
        }
    }
}
