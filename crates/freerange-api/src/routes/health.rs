//! Liveness endpoint. Unauthenticated.

use actix_web::{get, web, HttpResponse};
use serde_json::json;

use crate::bootstrap::AppState;

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let queue_reachable = state.queue.depth().await.is_ok();
    let providers = state.manager.health();
    let status = if queue_reachable { "ok" } else { "degraded" };
    HttpResponse::Ok().json(json!({
        "status": status,
        "queue_reachable": queue_reachable,
        "providers": providers,
    }))
}
