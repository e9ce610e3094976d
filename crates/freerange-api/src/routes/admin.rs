//! Operational queue surfaces: depth introspection, dead-letter listing,
//! and replay.

use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use freerange_core::NotifyError;

use crate::bootstrap::AppState;
use crate::error::ApiError;
use crate::middleware::AppContext;

#[get("/admin/queues/stats")]
pub async fn queue_stats(
    state: web::Data<AppState>,
    _ctx: AppContext,
) -> Result<HttpResponse, ApiError> {
    let depth = state
        .queue
        .depth()
        .await
        .map_err(NotifyError::from)
        .map_err(ApiError::from)?;
    Ok(HttpResponse::Ok().json(depth))
}

#[derive(Debug, Deserialize)]
pub struct DlqQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[get("/admin/queues/dlq")]
pub async fn dlq_list(
    state: web::Data<AppState>,
    _ctx: AppContext,
    query: web::Query<DlqQuery>,
) -> Result<HttpResponse, ApiError> {
    let entries = state
        .queue
        .list_dlq(query.limit.unwrap_or(50))
        .await
        .map_err(NotifyError::from)
        .map_err(ApiError::from)?;
    Ok(HttpResponse::Ok().json(entries))
}

#[derive(Debug, Deserialize)]
pub struct ReplayBody {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[post("/admin/queues/dlq/replay")]
pub async fn dlq_replay(
    state: web::Data<AppState>,
    _ctx: AppContext,
    body: Option<web::Json<ReplayBody>>,
) -> Result<HttpResponse, ApiError> {
    let limit = body.and_then(|b| b.limit).unwrap_or(100);
    let replayed = state
        .queue
        .replay_dlq(limit)
        .await
        .map_err(NotifyError::from)
        .map_err(ApiError::from)?;
    Ok(HttpResponse::Ok().json(json!({ "replayed": replayed })))
}
