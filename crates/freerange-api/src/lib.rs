//! HTTP surface and orchestration for FreeRangeNotify.
//!
//! The notification service here is the single ingress for every
//! notification: it validates, runs the admission policy, renders
//! templates, persists, and hands work to the queue layer. The actix-web
//! routes are a thin JSON shell around it, with API-key authentication and
//! per-application rate limiting in middleware.

pub mod bootstrap;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod service;
pub mod validation;

pub use bootstrap::{build_state, init_logging, run_server, run_workers_only, AppState};
pub use error::ApiError;
pub use service::NotificationService;
