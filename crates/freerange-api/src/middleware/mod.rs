//! HTTP middleware: API-key authentication and per-application rate
//! limiting.

pub mod auth;
pub mod rate_limit;

pub use auth::{ApiKeyAuth, AppContext};
pub use rate_limit::RateLimitMiddleware;
