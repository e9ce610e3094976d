//! Real-time stream endpoint (`text/event-stream`).
//!
//! Identity comes from either a zero-trust token (`token` + `app_id`
//! query, validated against the tenant's endpoint) or, when the deployment
//! allows it, a bare `user_id` query for development. The response opens
//! with a `connected` frame, then emits one `data:` frame per notification
//! plus periodic keep-alive comments.

use std::sync::Arc;

use actix_web::{get, web, HttpResponse};
use bytes::Bytes;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use freerange_core::NotifyError;
use freerange_delivery::Broadcaster;

use crate::bootstrap::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct SseQuery {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
}

/// Removes the connection from the broadcaster when the client goes away
/// and the stream is dropped.
struct ConnectionGuard {
    broadcaster: Arc<Broadcaster>,
    user_id: String,
    connection_id: Uuid,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let broadcaster = Arc::clone(&self.broadcaster);
        let user_id = std::mem::take(&mut self.user_id);
        let connection_id = self.connection_id;
        tokio::spawn(async move {
            broadcaster.unsubscribe(&user_id, connection_id).await;
        });
    }
}

#[get("/sse")]
pub async fn sse(
    state: web::Data<AppState>,
    query: web::Query<SseQuery>,
) -> Result<HttpResponse, ApiError> {
    let query = query.into_inner();
    let user_id = resolve_identity(&state, &query).await?;

    let (connection_id, mut rx) = state.broadcaster.subscribe(&user_id).await;
    debug!(user_id = %user_id, connection_id = %connection_id, "stream opened");

    let guard = ConnectionGuard {
        broadcaster: state.broadcaster.clone(),
        user_id,
        connection_id,
    };
    let keepalive = std::time::Duration::from_secs(state.config.broadcaster.keepalive_secs);

    let stream = async_stream::stream! {
        // Owned by the stream: dropped (and the connection removed) when
        // the client disconnects.
        let _guard = guard;
        yield Ok::<_, actix_web::Error>(Bytes::from_static(
            b"data: {\"type\":\"connected\"}\n\n",
        ));
        let mut ticker = tokio::time::interval(keepalive);
        ticker.tick().await; // swallow the immediate first tick
        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        yield Ok(Bytes::from(format!("data: {}\n\n", frame)));
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    yield Ok(Bytes::from_static(b": keep-alive\n\n"));
                }
            }
        }
    };

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream))
}

/// Zero-trust token validation when `token` + `app_id` are presented;
/// otherwise the development `user_id` path, gated by configuration.
async fn resolve_identity(state: &AppState, query: &SseQuery) -> Result<String, ApiError> {
    if let (Some(token), Some(app_id)) = (query.token.as_deref(), query.app_id.as_deref()) {
        let app = state
            .repos
            .applications
            .get_by_id(app_id)
            .await
            .map_err(|_| {
                ApiError(NotifyError::Unauthorized {
                    message: "unknown application".to_string(),
                })
            })?;
        let user_id = state.validator.validate(&app, token).await?;
        return Ok(user_id);
    }

    if let Some(user_id) = query.user_id.as_deref() {
        if state.config.stream.allow_user_id_query && !user_id.is_empty() {
            return Ok(user_id.to_string());
        }
    }

    Err(ApiError(NotifyError::Unauthorized {
        message: "stream requires a token or an allowed user_id".to_string(),
    }))
}
