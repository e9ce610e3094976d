//! In-memory store backend.
//!
//! Implements every repository trait with the exact semantics of the
//! PostgreSQL backend, including query interpretation, against mutexed
//! hash maps. Used by the test suites and by single-process development
//! deployments where durability is not required.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use freerange_core::{Application, Channel, Notification, NotificationStatus, Template, User};

use crate::error::{StoreError, StoreResult};
use crate::query::{DocQuery, Filter, SortOrder};

#[derive(Default)]
pub struct MemoryStore {
    notifications: RwLock<HashMap<String, Notification>>,
    users: RwLock<HashMap<String, User>>,
    applications: RwLock<HashMap<String, Application>>,
    templates: RwLock<HashMap<String, Template>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Resolve a dotted path (`content.title`) inside a document.
fn field_value<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Ordering between two JSON scalars: chronological for RFC 3339 strings,
/// numeric for numbers, lexicographic otherwise.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(dx), Ok(dy)) => Some(dx.cmp(&dy)),
                _ => Some(x.cmp(y)),
            }
        }
        _ => None,
    }
}

fn matches_filter(doc: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Term { field, value } => field_value(doc, field) == Some(value),
        Filter::Terms { field, values } => field_value(doc, field)
            .map(|v| values.contains(v))
            .unwrap_or(false),
        Filter::Match { field, query } => field_value(doc, field)
            .and_then(Value::as_str)
            .map(|text| text.to_lowercase().contains(&query.to_lowercase()))
            .unwrap_or(false),
        Filter::Range { field, gte, lte } => {
            let Some(actual) = field_value(doc, field) else {
                return false;
            };
            if let Some(min) = gte {
                if !matches!(
                    compare_values(actual, min),
                    Some(Ordering::Greater) | Some(Ordering::Equal)
                ) {
                    return false;
                }
            }
            if let Some(max) = lte {
                if !matches!(
                    compare_values(actual, max),
                    Some(Ordering::Less) | Some(Ordering::Equal)
                ) {
                    return false;
                }
            }
            true
        }
        Filter::Nested { path, value } => {
            let Some(Value::Array(items)) = field_value(doc, path) else {
                return false;
            };
            let Some(expected) = value.as_object() else {
                return false;
            };
            items.iter().any(|item| {
                expected
                    .iter()
                    .all(|(key, want)| item.get(key) == Some(want))
            })
        }
    }
}

/// Run a query against serializable entities, returning the page.
fn run_query<T: serde::Serialize + Clone>(entities: Vec<T>, query: &DocQuery) -> Vec<T> {
    let mut matched: Vec<(Value, T)> = entities
        .into_iter()
        .filter_map(|entity| {
            let doc = serde_json::to_value(&entity).ok()?;
            query
                .filters
                .iter()
                .all(|f| matches_filter(&doc, f))
                .then_some((doc, entity))
        })
        .collect();

    if let Some(sort) = &query.sort {
        matched.sort_by(|(a, _), (b, _)| {
            let ordering = match (field_value(a, &sort.field), field_value(b, &sort.field)) {
                (Some(va), Some(vb)) => compare_values(va, vb).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            match sort.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
    }

    matched
        .into_iter()
        .skip(query.from as usize)
        .take(query.size as usize)
        .map(|(_, entity)| entity)
        .collect()
}

fn count_query<T: serde::Serialize>(entities: &[T], query: &DocQuery) -> u64 {
    entities
        .iter()
        .filter_map(|entity| serde_json::to_value(entity).ok())
        .filter(|doc| query.filters.iter().all(|f| matches_filter(doc, f)))
        .count() as u64
}

#[async_trait]
impl crate::repository::NotificationRepository for MemoryStore {
    async fn create(&self, notification: &Notification) -> StoreResult<()> {
        let mut map = self.notifications.write().await;
        if map.contains_key(&notification.notification_id) {
            return Err(StoreError::Conflict {
                message: format!("notification {} already exists", notification.notification_id),
            });
        }
        map.insert(notification.notification_id.clone(), notification.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Notification> {
        self.notifications
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("notification"))
    }

    async fn update(&self, notification: &Notification) -> StoreResult<()> {
        let mut map = self.notifications.write().await;
        if !map.contains_key(&notification.notification_id) {
            return Err(StoreError::not_found("notification"));
        }
        map.insert(notification.notification_id.clone(), notification.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.notifications
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("notification"))
    }

    async fn exists(&self, id: &str) -> StoreResult<bool> {
        Ok(self.notifications.read().await.contains_key(id))
    }

    async fn search(&self, query: &DocQuery) -> StoreResult<Vec<Notification>> {
        let all: Vec<_> = self.notifications.read().await.values().cloned().collect();
        Ok(run_query(all, query))
    }

    async fn count(&self, query: &DocQuery) -> StoreResult<u64> {
        let all: Vec<_> = self.notifications.read().await.values().cloned().collect();
        Ok(count_query(&all, query))
    }

    async fn bulk_create(&self, notifications: &[Notification]) -> StoreResult<()> {
        let mut map = self.notifications.write().await;
        for n in notifications {
            map.insert(n.notification_id.clone(), n.clone());
        }
        Ok(())
    }

    async fn bulk_update_status(
        &self,
        ids: &[String],
        status: NotificationStatus,
    ) -> StoreResult<u64> {
        let mut map = self.notifications.write().await;
        let mut changed = 0;
        for id in ids {
            if let Some(n) = map.get_mut(id) {
                if n.transition(status).is_ok() {
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn find_due_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Notification>> {
        let map = self.notifications.read().await;
        let mut due: Vec<_> = map
            .values()
            .filter(|n| {
                n.status == NotificationStatus::Pending
                    && n.scheduled_at.map(|at| at <= now).unwrap_or(true)
            })
            .cloned()
            .collect();
        due.sort_by_key(|n| n.created_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn find_undelivered_realtime(
        &self,
        app_id: &str,
        user_id: &str,
    ) -> StoreResult<Vec<Notification>> {
        let map = self.notifications.read().await;
        let mut items: Vec<_> = map
            .values()
            .filter(|n| {
                n.app_id == app_id
                    && n.user_id == user_id
                    && n.channel.is_realtime()
                    && matches!(
                        n.status,
                        NotificationStatus::Queued | NotificationStatus::Sent
                    )
            })
            .cloned()
            .collect();
        items.sort_by_key(|n| n.created_at);
        Ok(items)
    }

    async fn count_unread(&self, app_id: &str, user_id: &str) -> StoreResult<u64> {
        let map = self.notifications.read().await;
        Ok(map.values().filter(|n| is_unread(n, app_id, user_id)).count() as u64)
    }

    async fn list_unread(
        &self,
        app_id: &str,
        user_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Notification>> {
        let map = self.notifications.read().await;
        let mut items: Vec<_> = map
            .values()
            .filter(|n| is_unread(n, app_id, user_id))
            .cloned()
            .collect();
        items.sort_by_key(|n| n.created_at);
        items.truncate(limit);
        Ok(items)
    }
}

fn is_unread(n: &Notification, app_id: &str, user_id: &str) -> bool {
    n.app_id == app_id
        && n.user_id == user_id
        && matches!(n.channel, Channel::InApp | Channel::Stream)
        && n.read_at.is_none()
        && matches!(
            n.status,
            NotificationStatus::Sent | NotificationStatus::Delivered
        )
}

#[async_trait]
impl crate::repository::UserRepository for MemoryStore {
    async fn create(&self, user: &User) -> StoreResult<()> {
        let mut map = self.users.write().await;
        if map.contains_key(&user.user_id) {
            return Err(StoreError::Conflict {
                message: format!("user {} already exists", user.user_id),
            });
        }
        map.insert(user.user_id.clone(), user.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<User> {
        self.users
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("user"))
    }

    async fn get_in_app(&self, app_id: &str, user_id: &str) -> StoreResult<User> {
        self.users
            .read()
            .await
            .get(user_id)
            .filter(|u| u.app_id == app_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("user"))
    }

    async fn update(&self, user: &User) -> StoreResult<()> {
        let mut map = self.users.write().await;
        if !map.contains_key(&user.user_id) {
            return Err(StoreError::not_found("user"));
        }
        map.insert(user.user_id.clone(), user.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.users
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("user"))
    }

    async fn exists(&self, id: &str) -> StoreResult<bool> {
        Ok(self.users.read().await.contains_key(id))
    }

    async fn search(&self, query: &DocQuery) -> StoreResult<Vec<User>> {
        let all: Vec<_> = self.users.read().await.values().cloned().collect();
        Ok(run_query(all, query))
    }

    async fn count(&self, query: &DocQuery) -> StoreResult<u64> {
        let all: Vec<_> = self.users.read().await.values().cloned().collect();
        Ok(count_query(&all, query))
    }
}

#[async_trait]
impl crate::repository::ApplicationRepository for MemoryStore {
    async fn create(&self, app: &Application) -> StoreResult<()> {
        let mut map = self.applications.write().await;
        if map.contains_key(&app.app_id) {
            return Err(StoreError::Conflict {
                message: format!("application {} already exists", app.app_id),
            });
        }
        map.insert(app.app_id.clone(), app.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Application> {
        self.applications
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("application"))
    }

    async fn get_by_api_key(&self, api_key: &str) -> StoreResult<Application> {
        self.applications
            .read()
            .await
            .values()
            .find(|a| a.api_key == api_key && a.active)
            .cloned()
            .ok_or_else(|| StoreError::not_found("application"))
    }

    async fn update(&self, app: &Application) -> StoreResult<()> {
        let mut map = self.applications.write().await;
        if !map.contains_key(&app.app_id) {
            return Err(StoreError::not_found("application"));
        }
        map.insert(app.app_id.clone(), app.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.applications
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("application"))
    }

    async fn exists(&self, id: &str) -> StoreResult<bool> {
        Ok(self.applications.read().await.contains_key(id))
    }
}

#[async_trait]
impl crate::repository::TemplateRepository for MemoryStore {
    async fn create(&self, template: &Template) -> StoreResult<()> {
        let mut map = self.templates.write().await;
        if map.contains_key(&template.template_id) {
            return Err(StoreError::Conflict {
                message: format!("template {} already exists", template.template_id),
            });
        }
        map.insert(template.template_id.clone(), template.clone());
        Ok(())
    }

    async fn get_in_app(&self, app_id: &str, template_id: &str) -> StoreResult<Template> {
        self.templates
            .read()
            .await
            .get(template_id)
            .filter(|t| t.app_id == app_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("template"))
    }

    async fn update(&self, template: &Template) -> StoreResult<()> {
        let mut map = self.templates.write().await;
        if !map.contains_key(&template.template_id) {
            return Err(StoreError::not_found("template"));
        }
        map.insert(template.template_id.clone(), template.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.templates
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("template"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{NotificationRepository, UserRepository};
    use crate::query::DocQuery;
    use freerange_core::{NotificationContent, Priority};
    use serde_json::json;

    fn notification(app: &str, user: &str, status: NotificationStatus) -> Notification {
        let mut n = Notification::new(
            app,
            user,
            Channel::Push,
            Priority::Normal,
            NotificationContent {
                title: "Hi".into(),
                body: "Hello there".into(),
                data: Default::default(),
            },
        );
        n.status = status;
        n
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemoryStore::new();
        let n = notification("a1", "u1", NotificationStatus::Pending);
        NotificationRepository::create(&store, &n).await.unwrap();
        let loaded = NotificationRepository::get_by_id(&store, &n.notification_id)
            .await
            .unwrap();
        assert_eq!(loaded, n);
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let store = MemoryStore::new();
        let n = notification("a1", "u1", NotificationStatus::Pending);
        NotificationRepository::create(&store, &n).await.unwrap();
        let err = NotificationRepository::create(&store, &n).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn search_filters_and_sorts() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let mut n = notification("a1", "u1", NotificationStatus::Queued);
            n.content.title = format!("msg {}", i);
            n.created_at = Utc::now() + chrono::Duration::seconds(i);
            NotificationRepository::create(&store, &n).await.unwrap();
        }
        let other = notification("a2", "u9", NotificationStatus::Queued);
        NotificationRepository::create(&store, &other).await.unwrap();

        let query = DocQuery::new()
            .term("app_id", "a1")
            .term("status", "queued")
            .sort("created_at", SortOrder::Desc)
            .paginate(0, 3);
        let page = NotificationRepository::search(&store, &query).await.unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].content.title, "msg 4");

        let total = NotificationRepository::count(&store, &query).await.unwrap();
        assert_eq!(total, 5);
    }

    #[tokio::test]
    async fn match_filter_is_case_insensitive_substring() {
        let store = MemoryStore::new();
        let n = notification("a1", "u1", NotificationStatus::Queued);
        NotificationRepository::create(&store, &n).await.unwrap();

        let hit = DocQuery::new().matches("content.body", "HELLO");
        assert_eq!(NotificationRepository::count(&store, &hit).await.unwrap(), 1);
        let miss = DocQuery::new().matches("content.body", "goodbye");
        assert_eq!(NotificationRepository::count(&store, &miss).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn nested_device_query() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let user = User {
            user_id: "u1".into(),
            app_id: "a1".into(),
            external_user_id: None,
            email: None,
            phone: None,
            timezone: None,
            language: None,
            webhook_url: None,
            devices: vec![freerange_core::Device {
                device_id: "d1".into(),
                platform: freerange_core::Platform::Ios,
                token: "t".into(),
                active: true,
                last_seen: None,
            }],
            preferences: Default::default(),
            created_at: now,
            updated_at: now,
        };
        UserRepository::create(&store, &user).await.unwrap();

        let ios = DocQuery::new().nested("devices", json!({"platform": "ios"}));
        assert_eq!(UserRepository::count(&store, &ios).await.unwrap(), 1);
        let android = DocQuery::new().nested("devices", json!({"platform": "android"}));
        assert_eq!(UserRepository::count(&store, &android).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bulk_update_status_skips_illegal_transitions() {
        let store = MemoryStore::new();
        let pending = notification("a1", "u1", NotificationStatus::Pending);
        let cancelled = notification("a1", "u1", NotificationStatus::Cancelled);
        NotificationRepository::create(&store, &pending).await.unwrap();
        NotificationRepository::create(&store, &cancelled).await.unwrap();

        let changed = store
            .bulk_update_status(
                &[
                    pending.notification_id.clone(),
                    cancelled.notification_id.clone(),
                    "missing".to_string(),
                ],
                NotificationStatus::Queued,
            )
            .await
            .unwrap();
        assert_eq!(changed, 1);
        assert_eq!(
            NotificationRepository::get_by_id(&store, &pending.notification_id)
                .await
                .unwrap()
                .status,
            NotificationStatus::Queued
        );
        assert_eq!(
            NotificationRepository::get_by_id(&store, &cancelled.notification_id)
                .await
                .unwrap()
                .status,
            NotificationStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn due_pending_includes_unscheduled() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut due = notification("a1", "u1", NotificationStatus::Pending);
        due.scheduled_at = Some(now - chrono::Duration::seconds(5));
        let mut future = notification("a1", "u1", NotificationStatus::Pending);
        future.scheduled_at = Some(now + chrono::Duration::seconds(3600));
        let unscheduled = notification("a1", "u1", NotificationStatus::Pending);

        for n in [&due, &future, &unscheduled] {
            NotificationRepository::create(&store, n).await.unwrap();
        }

        let found = store.find_due_pending(now, 10).await.unwrap();
        let ids: Vec<_> = found.iter().map(|n| n.notification_id.as_str()).collect();
        assert!(ids.contains(&due.notification_id.as_str()));
        assert!(ids.contains(&unscheduled.notification_id.as_str()));
        assert!(!ids.contains(&future.notification_id.as_str()));
    }
}
