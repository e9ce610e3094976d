//! Presence check-in.
//!
//! Registers (or refreshes) the user's presence with a fresh TTL and
//! flushes any queued in-app/stream notifications onto the live
//! connections, the "jump the line" path.

use std::time::Duration;

use actix_web::{post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use freerange_core::{NotifyError, Presence};

use crate::bootstrap::AppState;
use crate::error::ApiError;
use crate::middleware::AppContext;

#[derive(Debug, Deserialize)]
pub struct CheckInBody {
    pub user_id: String,
    #[serde(default)]
    pub client_endpoint: Option<String>,
}

#[post("/presence/check-in")]
pub async fn check_in(
    state: web::Data<AppState>,
    ctx: AppContext,
    body: web::Json<CheckInBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    if body.user_id.trim().is_empty() {
        return Err(ApiError(NotifyError::validation("user_id is required")));
    }

    // The user must belong to the calling application.
    state
        .repos
        .users
        .get_in_app(ctx.app_id(), &body.user_id)
        .await
        .map_err(NotifyError::from)?;

    let presence = Presence::check_in(
        body.user_id.clone(),
        ctx.app_id().to_string(),
        body.client_endpoint,
    );
    let ttl = Duration::from_secs(state.config.stream.presence_ttl_secs);
    state.presence.set(&presence, ttl).await?;

    let flushed = state
        .broadcaster
        .flush_queued(ctx.app_id(), &body.user_id)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "ok",
        "flushed": flushed,
    })))
}
