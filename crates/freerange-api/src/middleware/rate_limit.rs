//! Per-application ingress rate limiting.
//!
//! Uses the limiter's sliding window against the authenticated app's
//! configured `rate_limit` (requests per minute). Runs inside the auth
//! middleware, so the application context is always present; a zero limit
//! disables the check for that tenant.

use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;

use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, HttpMessage};
use futures_util::future::LocalBoxFuture;

use freerange_core::{NotifyError, PolicyRejection};
use freerange_delivery::RateLimiter;

use crate::error::ApiError;
use super::auth::AppContext;

const WINDOW_SECS: u64 = 60;

pub struct RateLimitMiddleware {
    limiter: Arc<dyn RateLimiter>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<dyn RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitService {
            service: Rc::new(service),
            limiter: Arc::clone(&self.limiter),
        }))
    }
}

pub struct RateLimitService<S> {
    service: Rc<S>,
    limiter: Arc<dyn RateLimiter>,
}

impl<S, B> Service<ServiceRequest> for RateLimitService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let limiter = Arc::clone(&self.limiter);

        Box::pin(async move {
            let limit = {
                let extensions = req.extensions();
                extensions
                    .get::<AppContext>()
                    .map(|ctx| (ctx.app.app_id.clone(), ctx.app.settings.rate_limit))
            };

            if let Some((app_id, limit)) = limit {
                if limit > 0 {
                    let key = format!("app:{}", app_id);
                    let allowed = limiter
                        .check_sliding_window(&key, WINDOW_SECS, limit)
                        .await
                        .map_err(ApiError::from)?;
                    if !allowed {
                        return Err(ApiError(NotifyError::Policy(
                            PolicyRejection::RateLimitExceeded,
                        ))
                        .into());
                    }
                }
            }

            service.call(req).await
        })
    }
}
