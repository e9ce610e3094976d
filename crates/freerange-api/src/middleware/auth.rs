//! API-key authentication.
//!
//! Every request outside the skip list must carry `Authorization: Bearer
//! <api_key>`. The key resolves to an active application whose identity is
//! bound into the request context; handlers never see the raw key again.

use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;

use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest};
use futures_util::future::LocalBoxFuture;

use freerange_core::{Application, NotifyError};
use freerange_store::ApplicationRepository;

use crate::error::ApiError;

/// The authenticated application, available to handlers via extraction.
#[derive(Clone)]
pub struct AppContext {
    pub app: Application,
}

impl AppContext {
    pub fn app_id(&self) -> &str {
        &self.app.app_id
    }
}

impl FromRequest for AppContext {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        ready(req.extensions().get::<AppContext>().cloned().ok_or_else(|| {
            ApiError(NotifyError::Unauthorized {
                message: "no application bound to request".to_string(),
            })
            .into()
        }))
    }
}

pub struct ApiKeyAuth {
    applications: Arc<dyn ApplicationRepository>,
}

impl ApiKeyAuth {
    pub fn new(applications: Arc<dyn ApplicationRepository>) -> Self {
        Self { applications }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ApiKeyAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = ApiKeyAuthService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ApiKeyAuthService {
            service: Rc::new(service),
            applications: Arc::clone(&self.applications),
        }))
    }
}

pub struct ApiKeyAuthService<S> {
    service: Rc<S>,
    applications: Arc<dyn ApplicationRepository>,
}

fn skip_auth(path: &str) -> bool {
    // The stream endpoint authenticates through zero-trust token
    // validation (browsers cannot set headers on EventSource).
    path == "/health" || path.starts_with("/v1/sse")
}

fn extract_bearer(value: &str) -> Option<&str> {
    value.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

impl<S, B> Service<ServiceRequest> for ApiKeyAuthService<S>
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
        let applications = Arc::clone(&self.applications);

        Box::pin(async move {
            if skip_auth(req.path()) {
                return service.call(req).await;
            }

            let header = req
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok());
            let Some(api_key) = header.and_then(extract_bearer) else {
                return Err(ApiError(NotifyError::Unauthorized {
                    message: "missing bearer api key".to_string(),
                })
                .into());
            };

            match applications.get_by_api_key(api_key).await {
                Ok(app) => {
                    req.extensions_mut().insert(AppContext { app });
                    service.call(req).await
                }
                Err(freerange_store::StoreError::NotFound { .. }) => {
                    Err(ApiError(NotifyError::InvalidApiKey).into())
                }
                Err(e) => Err(ApiError(NotifyError::from(e)).into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("Basic abc123"), None);
    }

    #[test]
    fn skip_list() {
        assert!(skip_auth("/health"));
        assert!(skip_auth("/v1/sse"));
        assert!(!skip_auth("/v1/notifications"));
    }
}
