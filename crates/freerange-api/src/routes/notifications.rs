//! Notification endpoints.

use actix_web::{delete, get, post, put, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use freerange_core::NotificationStatus;

use crate::bootstrap::AppState;
use crate::error::ApiError;
use crate::middleware::AppContext;
use crate::service::{BulkSendRequest, ListQuery, SendRequest};

#[post("/notifications")]
pub async fn send(
    state: web::Data<AppState>,
    ctx: AppContext,
    body: web::Json<SendRequest>,
) -> Result<HttpResponse, ApiError> {
    let notification = state.service.send(&ctx.app, body.into_inner()).await?;
    Ok(HttpResponse::Accepted().json(notification))
}

#[post("/notifications/bulk")]
pub async fn send_bulk(
    state: web::Data<AppState>,
    ctx: AppContext,
    body: web::Json<BulkSendRequest>,
) -> Result<HttpResponse, ApiError> {
    let outcome = state.service.send_bulk(&ctx.app, body.into_inner()).await?;
    Ok(HttpResponse::Accepted().json(outcome))
}

#[post("/notifications/batch")]
pub async fn send_batch(
    state: web::Data<AppState>,
    ctx: AppContext,
    body: web::Json<Vec<SendRequest>>,
) -> Result<HttpResponse, ApiError> {
    let outcome = state.service.send_batch(&ctx.app, body.into_inner()).await?;
    Ok(HttpResponse::Accepted().json(outcome))
}

#[get("/notifications")]
pub async fn list(
    state: web::Data<AppState>,
    ctx: AppContext,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ApiError> {
    let response = state
        .service
        .list(ctx.app_id(), query.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

#[get("/notifications/{id}")]
pub async fn get(
    state: web::Data<AppState>,
    ctx: AppContext,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let notification = state.service.get(ctx.app_id(), &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(notification))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateBody {
    pub status: NotificationStatus,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[put("/notifications/{id}/status")]
pub async fn update_status(
    state: web::Data<AppState>,
    ctx: AppContext,
    path: web::Path<String>,
    body: web::Json<StatusUpdateBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let notification = state
        .service
        .update_status(ctx.app_id(), &path.into_inner(), body.status, body.error_message)
        .await?;
    Ok(HttpResponse::Ok().json(notification))
}

#[delete("/notifications/batch")]
pub async fn cancel_batch(
    state: web::Data<AppState>,
    ctx: AppContext,
    body: web::Json<CancelBatchBody>,
) -> Result<HttpResponse, ApiError> {
    let cancelled = state
        .service
        .cancel_batch(ctx.app_id(), &body.into_inner().notification_ids)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "cancelled": cancelled })))
}

#[derive(Debug, Deserialize)]
pub struct CancelBatchBody {
    pub notification_ids: Vec<String>,
}

#[delete("/notifications/{id}")]
pub async fn cancel(
    state: web::Data<AppState>,
    ctx: AppContext,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let notification = state.service.cancel(ctx.app_id(), &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(notification))
}

#[post("/notifications/{id}/retry")]
pub async fn retry(
    state: web::Data<AppState>,
    ctx: AppContext,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let notification = state.service.retry(ctx.app_id(), &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(notification))
}

#[derive(Debug, Deserialize)]
pub struct UnreadQuery {
    pub user_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[get("/notifications/unread/count")]
pub async fn unread_count(
    state: web::Data<AppState>,
    ctx: AppContext,
    query: web::Query<UnreadQuery>,
) -> Result<HttpResponse, ApiError> {
    let count = state
        .service
        .unread_count(ctx.app_id(), &query.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "count": count })))
}

#[get("/notifications/unread")]
pub async fn unread_list(
    state: web::Data<AppState>,
    ctx: AppContext,
    query: web::Query<UnreadQuery>,
) -> Result<HttpResponse, ApiError> {
    let items = state
        .service
        .unread_list(ctx.app_id(), &query.user_id, query.limit.unwrap_or(50))
        .await?;
    Ok(HttpResponse::Ok().json(items))
}

#[derive(Debug, Deserialize)]
pub struct MarkReadBody {
    pub user_id: String,
    pub notification_ids: Vec<String>,
}

#[post("/notifications/read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    ctx: AppContext,
    body: web::Json<MarkReadBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let updated = state
        .service
        .mark_read(ctx.app_id(), &body.user_id, &body.notification_ids)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "updated": updated })))
}
