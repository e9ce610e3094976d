//! Repository traits, one per entity, all backed by the same document
//! engine. Beyond the uniform CRUD/search surface, the notification
//! repository carries the few purpose-built lookups the scheduler, the
//! broadcaster, and the unread surfaces depend on; keeping them named (and
//! index-backed) beats forcing OR-composition through the generic query.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use freerange_core::{Application, Notification, NotificationStatus, Template, User};

use crate::error::StoreResult;
use crate::query::DocQuery;

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, notification: &Notification) -> StoreResult<()>;
    async fn get_by_id(&self, id: &str) -> StoreResult<Notification>;
    async fn update(&self, notification: &Notification) -> StoreResult<()>;
    async fn delete(&self, id: &str) -> StoreResult<()>;
    async fn exists(&self, id: &str) -> StoreResult<bool>;
    async fn search(&self, query: &DocQuery) -> StoreResult<Vec<Notification>>;
    async fn count(&self, query: &DocQuery) -> StoreResult<u64>;
    async fn bulk_create(&self, notifications: &[Notification]) -> StoreResult<()>;

    /// Apply a status transition to every listed notification for which the
    /// transition is legal; returns how many documents changed. Illegal
    /// transitions (e.g. an already-cancelled item) are skipped, which is
    /// what makes double promotion by the scheduler harmless.
    async fn bulk_update_status(
        &self,
        ids: &[String],
        status: NotificationStatus,
    ) -> StoreResult<u64>;

    /// Pending notifications whose schedule has come due (or that never had
    /// one). The scheduler's fallback resync path.
    async fn find_due_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Notification>>;

    /// Undelivered in-app/stream notifications for a user, oldest first.
    /// Feeds the broadcaster's flush-on-check-in.
    async fn find_undelivered_realtime(
        &self,
        app_id: &str,
        user_id: &str,
    ) -> StoreResult<Vec<Notification>>;

    async fn count_unread(&self, app_id: &str, user_id: &str) -> StoreResult<u64>;
    async fn list_unread(
        &self,
        app_id: &str,
        user_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Notification>>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User) -> StoreResult<()>;
    async fn get_by_id(&self, id: &str) -> StoreResult<User>;
    /// Tenant-scoped lookup; a user belonging to another app reads as absent.
    async fn get_in_app(&self, app_id: &str, user_id: &str) -> StoreResult<User>;
    async fn update(&self, user: &User) -> StoreResult<()>;
    async fn delete(&self, id: &str) -> StoreResult<()>;
    async fn exists(&self, id: &str) -> StoreResult<bool>;
    async fn search(&self, query: &DocQuery) -> StoreResult<Vec<User>>;
    async fn count(&self, query: &DocQuery) -> StoreResult<u64>;
}

#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn create(&self, app: &Application) -> StoreResult<()>;
    async fn get_by_id(&self, id: &str) -> StoreResult<Application>;
    /// The authentication path. Only active applications resolve.
    async fn get_by_api_key(&self, api_key: &str) -> StoreResult<Application>;
    async fn update(&self, app: &Application) -> StoreResult<()>;
    async fn delete(&self, id: &str) -> StoreResult<()>;
    async fn exists(&self, id: &str) -> StoreResult<bool>;
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn create(&self, template: &Template) -> StoreResult<()>;
    async fn get_in_app(&self, app_id: &str, template_id: &str) -> StoreResult<Template>;
    async fn update(&self, template: &Template) -> StoreResult<()>;
    async fn delete(&self, id: &str) -> StoreResult<()>;
}

/// The full set of repositories a deployment wires once at bootstrap.
#[derive(Clone)]
pub struct Repositories {
    pub notifications: Arc<dyn NotificationRepository>,
    pub users: Arc<dyn UserRepository>,
    pub applications: Arc<dyn ApplicationRepository>,
    pub templates: Arc<dyn TemplateRepository>,
}
