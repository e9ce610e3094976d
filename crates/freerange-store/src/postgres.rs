//! PostgreSQL document store backend.
//!
//! Each entity table stores the full JSON document in a JSONB column, with
//! the exact-match fields the query paths need promoted into indexed
//! keyword columns. The document is the source of truth; the promoted
//! columns exist only so the engine can answer term, range, and containment
//! queries from indexes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use serde_json::Value;

use freerange_core::{Application, Notification, NotificationStatus, Template, User};

use crate::error::{StoreError, StoreResult};
use crate::query::{DocQuery, Filter, SortOrder};
use crate::schema::{applications, notifications, templates, users};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Build the r2d2 connection pool for the store.
pub fn init_pool(database_url: &str, pool_size: u32) -> StoreResult<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(pool_size)
        .build(manager)
        .map_err(|e| StoreError::Unavailable {
            message: format!("failed to create connection pool: {}", e),
        })
}

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> StoreResult<PooledConnection<ConnectionManager<PgConnection>>> {
        self.pool.get().map_err(|e| StoreError::Unavailable {
            message: format!("failed to get database connection: {}", e),
        })
    }
}

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = notifications)]
struct NotificationRow {
    id: String,
    app_id: String,
    user_id: String,
    template_id: Option<String>,
    channel: String,
    priority: String,
    status: String,
    category: Option<String>,
    scheduled_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    doc: Value,
}

impl NotificationRow {
    fn from_domain(n: &Notification) -> StoreResult<Self> {
        Ok(Self {
            id: n.notification_id.clone(),
            app_id: n.app_id.clone(),
            user_id: n.user_id.clone(),
            template_id: n.template_id.clone(),
            channel: n.channel.as_str().to_string(),
            priority: n.priority.as_str().to_string(),
            status: n.status.as_str().to_string(),
            category: n.category.clone(),
            scheduled_at: n.scheduled_at,
            sent_at: n.sent_at,
            created_at: n.created_at,
            updated_at: n.updated_at,
            doc: serde_json::to_value(n)?,
        })
    }

    fn into_domain(self) -> StoreResult<Notification> {
        Ok(serde_json::from_value(self.doc)?)
    }
}

fn value_as_str(value: &Value) -> StoreResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Ok(other.to_string()),
    }
}

fn value_as_datetime(value: &Value) -> StoreResult<DateTime<Utc>> {
    let raw = value.as_str().ok_or_else(|| {
        StoreError::backend(format!("expected RFC 3339 timestamp, got {}", value))
    })?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::backend(format!("invalid timestamp {:?}: {}", raw, e)))
}

type BoxedNotificationQuery<'a> = notifications::BoxedQuery<'a, Pg>;

fn apply_notification_filter<'a>(
    mut q: BoxedNotificationQuery<'a>,
    filter: &Filter,
) -> StoreResult<BoxedNotificationQuery<'a>> {
    use notifications::dsl;
    q = match filter {
        Filter::Term { field, value } => {
            let v = value_as_str(value)?;
            match field.as_str() {
                "app_id" => q.filter(dsl::app_id.eq(v)),
                "user_id" => q.filter(dsl::user_id.eq(v)),
                "channel" => q.filter(dsl::channel.eq(v)),
                "priority" => q.filter(dsl::priority.eq(v)),
                "status" => q.filter(dsl::status.eq(v)),
                "category" => q.filter(dsl::category.eq(v)),
                "template_id" => q.filter(dsl::template_id.eq(v)),
                "notification_id" | "id" => q.filter(dsl::id.eq(v)),
                other => {
                    return Err(StoreError::backend(format!(
                        "no index for term field {:?}",
                        other
                    )))
                }
            }
        }
        Filter::Terms { field, values } => {
            let vs: Vec<String> = values
                .iter()
                .map(value_as_str)
                .collect::<StoreResult<_>>()?;
            match field.as_str() {
                "status" => q.filter(dsl::status.eq_any(vs)),
                "channel" => q.filter(dsl::channel.eq_any(vs)),
                "priority" => q.filter(dsl::priority.eq_any(vs)),
                "notification_id" | "id" => q.filter(dsl::id.eq_any(vs)),
                other => {
                    return Err(StoreError::backend(format!(
                        "no index for terms field {:?}",
                        other
                    )))
                }
            }
        }
        Filter::Match { field, query } => {
            let pattern = format!("%{}%", query.replace('%', "\\%"));
            let fragment = match field.as_str() {
                "content.title" | "title" => "doc->'content'->>'title' ILIKE ",
                "content.body" | "body" => "doc->'content'->>'body' ILIKE ",
                other => {
                    return Err(StoreError::backend(format!(
                        "no full-text field {:?}",
                        other
                    )))
                }
            };
            q.filter(
                diesel::dsl::sql::<diesel::sql_types::Bool>(fragment)
                    .bind::<diesel::sql_types::Text, _>(pattern),
            )
        }
        Filter::Range { field, gte, lte } => {
            let gte = gte.as_ref().map(value_as_datetime).transpose()?;
            let lte = lte.as_ref().map(value_as_datetime).transpose()?;
            match field.as_str() {
                "created_at" => {
                    if let Some(min) = gte {
                        q = q.filter(dsl::created_at.ge(min));
                    }
                    if let Some(max) = lte {
                        q = q.filter(dsl::created_at.le(max));
                    }
                    q
                }
                "updated_at" => {
                    if let Some(min) = gte {
                        q = q.filter(dsl::updated_at.ge(min));
                    }
                    if let Some(max) = lte {
                        q = q.filter(dsl::updated_at.le(max));
                    }
                    q
                }
                "scheduled_at" => {
                    if let Some(min) = gte {
                        q = q.filter(dsl::scheduled_at.ge(min));
                    }
                    if let Some(max) = lte {
                        q = q.filter(dsl::scheduled_at.le(max));
                    }
                    q
                }
                "sent_at" => {
                    if let Some(min) = gte {
                        q = q.filter(dsl::sent_at.ge(min));
                    }
                    if let Some(max) = lte {
                        q = q.filter(dsl::sent_at.le(max));
                    }
                    q
                }
                other => {
                    return Err(StoreError::backend(format!(
                        "no index for range field {:?}",
                        other
                    )))
                }
            }
        }
        Filter::Nested { .. } => {
            return Err(StoreError::backend(
                "nested queries are not supported on notifications",
            ))
        }
    };
    Ok(q)
}

fn notification_query<'a>(query: &DocQuery) -> StoreResult<BoxedNotificationQuery<'a>> {
    let mut q = notifications::table.into_boxed();
    for filter in &query.filters {
        q = apply_notification_filter(q, filter)?;
    }
    Ok(q)
}

fn apply_notification_sort<'a>(
    q: BoxedNotificationQuery<'a>,
    query: &DocQuery,
) -> StoreResult<BoxedNotificationQuery<'a>> {
    use notifications::dsl;
    let Some(sort) = &query.sort else {
        return Ok(q.order(dsl::created_at.desc()));
    };
    let sorted = match (sort.field.as_str(), sort.order) {
        ("created_at", SortOrder::Asc) => q.order(dsl::created_at.asc()),
        ("created_at", SortOrder::Desc) => q.order(dsl::created_at.desc()),
        ("updated_at", SortOrder::Asc) => q.order(dsl::updated_at.asc()),
        ("updated_at", SortOrder::Desc) => q.order(dsl::updated_at.desc()),
        ("sent_at", SortOrder::Asc) => q.order(dsl::sent_at.asc()),
        ("sent_at", SortOrder::Desc) => q.order(dsl::sent_at.desc()),
        ("scheduled_at", SortOrder::Asc) => q.order(dsl::scheduled_at.asc()),
        ("scheduled_at", SortOrder::Desc) => q.order(dsl::scheduled_at.desc()),
        (other, _) => {
            return Err(StoreError::backend(format!(
                "no index for sort field {:?}",
                other
            )))
        }
    };
    Ok(sorted)
}

const REALTIME_CHANNELS: [&str; 2] = ["in_app", "stream"];

#[async_trait]
impl crate::repository::NotificationRepository for PostgresStore {
    async fn create(&self, notification: &Notification) -> StoreResult<()> {
        let row = NotificationRow::from_domain(notification)?;
        let mut conn = self.conn()?;
        diesel::insert_into(notifications::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Notification> {
        let mut conn = self.conn()?;
        let row: NotificationRow = notifications::table
            .find(id)
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| StoreError::not_found("notification"))?;
        row.into_domain()
    }

    async fn update(&self, notification: &Notification) -> StoreResult<()> {
        let row = NotificationRow::from_domain(notification)?;
        let mut conn = self.conn()?;
        let updated = diesel::update(notifications::table.find(&row.id))
            .set(&row)
            .execute(&mut conn)?;
        if updated == 0 {
            return Err(StoreError::not_found("notification"));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let deleted =
            diesel::delete(notifications::table.find(id)).execute(&mut conn)?;
        if deleted == 0 {
            return Err(StoreError::not_found("notification"));
        }
        Ok(())
    }

    async fn exists(&self, id: &str) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let count: i64 = notifications::table
            .find(id)
            .count()
            .get_result(&mut conn)?;
        Ok(count > 0)
    }

    async fn search(&self, query: &DocQuery) -> StoreResult<Vec<Notification>> {
        let mut conn = self.conn()?;
        let q = notification_query(query)?;
        let q = apply_notification_sort(q, query)?;
        let rows: Vec<NotificationRow> = q
            .offset(query.from as i64)
            .limit(query.size as i64)
            .load(&mut conn)?;
        rows.into_iter().map(NotificationRow::into_domain).collect()
    }

    async fn count(&self, query: &DocQuery) -> StoreResult<u64> {
        let mut conn = self.conn()?;
        let q = notification_query(query)?;
        let count: i64 = q.count().get_result(&mut conn)?;
        Ok(count as u64)
    }

    async fn bulk_create(&self, items: &[Notification]) -> StoreResult<()> {
        let rows: Vec<NotificationRow> = items
            .iter()
            .map(NotificationRow::from_domain)
            .collect::<StoreResult<_>>()?;
        let mut conn = self.conn()?;
        diesel::insert_into(notifications::table)
            .values(&rows)
            .execute(&mut conn)?;
        Ok(())
    }

    async fn bulk_update_status(
        &self,
        ids: &[String],
        status: NotificationStatus,
    ) -> StoreResult<u64> {
        // Read-modify-write through the domain transition so illegal
        // transitions (already-cancelled items, double promotions) are
        // skipped rather than forced.
        use crate::repository::NotificationRepository;
        let mut changed = 0;
        for id in ids {
            let mut n = match NotificationRepository::get_by_id(self, id).await {
                Ok(n) => n,
                Err(StoreError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            if n.transition(status).is_ok() {
                NotificationRepository::update(self, &n).await?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn find_due_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Notification>> {
        use notifications::dsl;
        let mut conn = self.conn()?;
        let rows: Vec<NotificationRow> = notifications::table
            .filter(dsl::status.eq("pending"))
            .filter(dsl::scheduled_at.le(now).or(dsl::scheduled_at.is_null()))
            .order(dsl::created_at.asc())
            .limit(limit as i64)
            .load(&mut conn)?;
        rows.into_iter().map(NotificationRow::into_domain).collect()
    }

    async fn find_undelivered_realtime(
        &self,
        app_id: &str,
        user_id: &str,
    ) -> StoreResult<Vec<Notification>> {
        use notifications::dsl;
        let mut conn = self.conn()?;
        let rows: Vec<NotificationRow> = notifications::table
            .filter(dsl::app_id.eq(app_id))
            .filter(dsl::user_id.eq(user_id))
            .filter(dsl::channel.eq_any(REALTIME_CHANNELS))
            .filter(dsl::status.eq_any(["queued", "sent"]))
            .order(dsl::created_at.asc())
            .load(&mut conn)?;
        rows.into_iter().map(NotificationRow::into_domain).collect()
    }

    async fn count_unread(&self, app_id: &str, user_id: &str) -> StoreResult<u64> {
        use notifications::dsl;
        let mut conn = self.conn()?;
        let count: i64 = notifications::table
            .filter(dsl::app_id.eq(app_id))
            .filter(dsl::user_id.eq(user_id))
            .filter(dsl::channel.eq_any(REALTIME_CHANNELS))
            .filter(dsl::status.eq_any(["sent", "delivered"]))
            .count()
            .get_result(&mut conn)?;
        Ok(count as u64)
    }

    async fn list_unread(
        &self,
        app_id: &str,
        user_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Notification>> {
        use notifications::dsl;
        let mut conn = self.conn()?;
        let rows: Vec<NotificationRow> = notifications::table
            .filter(dsl::app_id.eq(app_id))
            .filter(dsl::user_id.eq(user_id))
            .filter(dsl::channel.eq_any(REALTIME_CHANNELS))
            .filter(dsl::status.eq_any(["sent", "delivered"]))
            .order(dsl::created_at.asc())
            .limit(limit as i64)
            .load(&mut conn)?;
        rows.into_iter().map(NotificationRow::into_domain).collect()
    }
}

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = users)]
struct UserRow {
    id: String,
    app_id: String,
    external_user_id: Option<String>,
    email: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    doc: Value,
}

impl UserRow {
    fn from_domain(u: &User) -> StoreResult<Self> {
        Ok(Self {
            id: u.user_id.clone(),
            app_id: u.app_id.clone(),
            external_user_id: u.external_user_id.clone(),
            email: u.email.clone(),
            created_at: u.created_at,
            updated_at: u.updated_at,
            doc: serde_json::to_value(u)?,
        })
    }

    fn into_domain(self) -> StoreResult<User> {
        Ok(serde_json::from_value(self.doc)?)
    }
}

type BoxedUserQuery<'a> = users::BoxedQuery<'a, Pg>;

fn user_query<'a>(query: &DocQuery) -> StoreResult<BoxedUserQuery<'a>> {
    use diesel::PgJsonbExpressionMethods;
    use users::dsl;
    let mut q = users::table.into_boxed();
    for filter in &query.filters {
        q = match filter {
            Filter::Term { field, value } => {
                let v = value_as_str(value)?;
                match field.as_str() {
                    "app_id" => q.filter(dsl::app_id.eq(v)),
                    "external_user_id" => q.filter(dsl::external_user_id.eq(v)),
                    "email" => q.filter(dsl::email.eq(v)),
                    "user_id" | "id" => q.filter(dsl::id.eq(v)),
                    other => {
                        return Err(StoreError::backend(format!(
                            "no index for term field {:?}",
                            other
                        )))
                    }
                }
            }
            Filter::Nested { path, value } => {
                let mut envelope = serde_json::Map::new();
                envelope.insert(path.clone(), Value::Array(vec![value.clone()]));
                q.filter(dsl::doc.contains(Value::Object(envelope)))
            }
            other => {
                return Err(StoreError::backend(format!(
                    "unsupported user filter: {:?}",
                    other
                )))
            }
        };
    }
    Ok(q)
}

#[async_trait]
impl crate::repository::UserRepository for PostgresStore {
    async fn create(&self, user: &User) -> StoreResult<()> {
        let row = UserRow::from_domain(user)?;
        let mut conn = self.conn()?;
        diesel::insert_into(users::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<User> {
        let mut conn = self.conn()?;
        let row: UserRow = users::table
            .find(id)
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| StoreError::not_found("user"))?;
        row.into_domain()
    }

    async fn get_in_app(&self, app_id: &str, user_id: &str) -> StoreResult<User> {
        use users::dsl;
        let mut conn = self.conn()?;
        let row: UserRow = users::table
            .filter(dsl::id.eq(user_id))
            .filter(dsl::app_id.eq(app_id))
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| StoreError::not_found("user"))?;
        row.into_domain()
    }

    async fn update(&self, user: &User) -> StoreResult<()> {
        let row = UserRow::from_domain(user)?;
        let mut conn = self.conn()?;
        let updated = diesel::update(users::table.find(&row.id))
            .set(&row)
            .execute(&mut conn)?;
        if updated == 0 {
            return Err(StoreError::not_found("user"));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let deleted = diesel::delete(users::table.find(id)).execute(&mut conn)?;
        if deleted == 0 {
            return Err(StoreError::not_found("user"));
        }
        Ok(())
    }

    async fn exists(&self, id: &str) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let count: i64 = users::table.find(id).count().get_result(&mut conn)?;
        Ok(count > 0)
    }

    async fn search(&self, query: &DocQuery) -> StoreResult<Vec<User>> {
        let mut conn = self.conn()?;
        let rows: Vec<UserRow> = user_query(query)?
            .offset(query.from as i64)
            .limit(query.size as i64)
            .load(&mut conn)?;
        rows.into_iter().map(UserRow::into_domain).collect()
    }

    async fn count(&self, query: &DocQuery) -> StoreResult<u64> {
        let mut conn = self.conn()?;
        let count: i64 = user_query(query)?.count().get_result(&mut conn)?;
        Ok(count as u64)
    }
}

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = applications)]
struct ApplicationRow {
    id: String,
    api_key: String,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    doc: Value,
}

impl ApplicationRow {
    fn from_domain(a: &Application) -> StoreResult<Self> {
        Ok(Self {
            id: a.app_id.clone(),
            api_key: a.api_key.clone(),
            active: a.active,
            created_at: a.created_at,
            updated_at: a.updated_at,
            doc: serde_json::to_value(a)?,
        })
    }

    fn into_domain(self) -> StoreResult<Application> {
        Ok(serde_json::from_value(self.doc)?)
    }
}

#[async_trait]
impl crate::repository::ApplicationRepository for PostgresStore {
    async fn create(&self, app: &Application) -> StoreResult<()> {
        let row = ApplicationRow::from_domain(app)?;
        let mut conn = self.conn()?;
        diesel::insert_into(applications::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Application> {
        let mut conn = self.conn()?;
        let row: ApplicationRow = applications::table
            .find(id)
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| StoreError::not_found("application"))?;
        row.into_domain()
    }

    async fn get_by_api_key(&self, api_key: &str) -> StoreResult<Application> {
        use applications::dsl;
        let mut conn = self.conn()?;
        let row: ApplicationRow = applications::table
            .filter(dsl::api_key.eq(api_key))
            .filter(dsl::active.eq(true))
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| StoreError::not_found("application"))?;
        row.into_domain()
    }

    async fn update(&self, app: &Application) -> StoreResult<()> {
        let row = ApplicationRow::from_domain(app)?;
        let mut conn = self.conn()?;
        let updated = diesel::update(applications::table.find(&row.id))
            .set(&row)
            .execute(&mut conn)?;
        if updated == 0 {
            return Err(StoreError::not_found("application"));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let deleted = diesel::delete(applications::table.find(id)).execute(&mut conn)?;
        if deleted == 0 {
            return Err(StoreError::not_found("application"));
        }
        Ok(())
    }

    async fn exists(&self, id: &str) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let count: i64 = applications::table.find(id).count().get_result(&mut conn)?;
        Ok(count > 0)
    }
}

#[derive(Queryable, Insertable, AsChangeset)]
#[diesel(table_name = templates)]
struct TemplateRow {
    id: String,
    app_id: String,
    name: String,
    locale: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    doc: Value,
}

impl TemplateRow {
    fn from_domain(t: &Template) -> StoreResult<Self> {
        Ok(Self {
            id: t.template_id.clone(),
            app_id: t.app_id.clone(),
            name: t.name.clone(),
            locale: t.locale.clone(),
            created_at: t.created_at,
            updated_at: t.updated_at,
            doc: serde_json::to_value(t)?,
        })
    }

    fn into_domain(self) -> StoreResult<Template> {
        Ok(serde_json::from_value(self.doc)?)
    }
}

#[async_trait]
impl crate::repository::TemplateRepository for PostgresStore {
    async fn create(&self, template: &Template) -> StoreResult<()> {
        let row = TemplateRow::from_domain(template)?;
        let mut conn = self.conn()?;
        diesel::insert_into(templates::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(())
    }

    async fn get_in_app(&self, app_id: &str, template_id: &str) -> StoreResult<Template> {
        use templates::dsl;
        let mut conn = self.conn()?;
        let row: TemplateRow = templates::table
            .filter(dsl::id.eq(template_id))
            .filter(dsl::app_id.eq(app_id))
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| StoreError::not_found("template"))?;
        row.into_domain()
    }

    async fn update(&self, template: &Template) -> StoreResult<()> {
        let row = TemplateRow::from_domain(template)?;
        let mut conn = self.conn()?;
        let updated = diesel::update(templates::table.find(&row.id))
            .set(&row)
            .execute(&mut conn)?;
        if updated == 0 {
            return Err(StoreError::not_found("template"));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let deleted = diesel::delete(templates::table.find(id)).execute(&mut conn)?;
        if deleted == 0 {
            return Err(StoreError::not_found("template"));
        }
        Ok(())
    }
}
