//! Zero-trust stream token validation.
//!
//! Tenants that configure `validation_url` delegate token verification to
//! their own endpoint: the presented token is forwarded using the
//! configured method and placement, and a successful response must be HTTP
//! 200 with a JSON body whose `valid` field (when present) is true and
//! which exposes a user identifier under one of several well-known keys.
//! The call is external I/O: bounded timeout, circuit breaker, and the
//! token itself never appears in logs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use freerange_core::config::ValidationClientConfig;
use freerange_core::{Application, NotifyError, TokenPlacement, ValidationMethod};

/// Keys searched, in order, for the user identifier in a validation
/// response. The flexible lookup is a documented contract, not a fallback.
const USER_ID_KEYS: [&str; 6] = ["user_id", "id", "sub", "uid", "account_id", "username"];

#[derive(Debug, Clone, Copy, PartialEq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    failures: u32,
    opened_at: Option<Instant>,
}

/// Failure-threshold circuit breaker with half-open probing.
pub struct CircuitBreaker {
    inner: RwLock<BreakerInner>,
    threshold: u32,
    reset_after: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, reset_after: Duration) -> Self {
        Self {
            inner: RwLock::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                opened_at: None,
            }),
            threshold,
            reset_after,
        }
    }

    pub async fn can_proceed(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.reset_after)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        inner.state = BreakerState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.failures += 1;
        if inner.failures >= self.threshold || inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

pub struct TokenValidator {
    client: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
}

impl TokenValidator {
    pub fn new(config: ValidationClientConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker_threshold,
            Duration::from_secs(config.breaker_reset_secs),
        ));
        Self { client, breaker }
    }

    /// Validate a stream token against the application's endpoint. Returns
    /// the resolved user id; any other outcome is an authorization failure.
    pub async fn validate(&self, app: &Application, token: &str) -> Result<String, NotifyError> {
        let unauthorized = |message: &str| NotifyError::Unauthorized {
            message: message.to_string(),
        };

        let Some(url) = app.settings.validation_url.as_deref() else {
            return Err(unauthorized("application has no validation endpoint"));
        };
        let config = app.settings.validation_config.clone().unwrap_or_default();

        if !self.breaker.can_proceed().await {
            warn!(app_id = %app.app_id, "validation circuit open, rejecting token");
            return Err(unauthorized("token validation temporarily unavailable"));
        }

        let mut request = match config.method {
            ValidationMethod::Get => self.client.get(url),
            ValidationMethod::Post => self.client.post(url),
        };
        for (name, value) in &config.static_headers {
            request = request.header(name, value);
        }
        request = match config.token_placement {
            TokenPlacement::BodyJson => {
                let mut body = serde_json::Map::new();
                body.insert(config.token_key.clone(), Value::String(token.to_string()));
                request.json(&Value::Object(body))
            }
            TokenPlacement::BodyForm => {
                request.form(&[(config.token_key.as_str(), token)])
            }
            TokenPlacement::Header => request.header(config.token_key.as_str(), token),
            TokenPlacement::Query => request.query(&[(config.token_key.as_str(), token)]),
            TokenPlacement::Cookie => {
                request.header("Cookie", format!("{}={}", config.token_key, token))
            }
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                self.breaker.record_failure().await;
                warn!(app_id = %app.app_id, error = %e, "validation request failed");
                return Err(unauthorized("token validation failed"));
            }
        };
        self.breaker.record_success().await;

        if response.status() != reqwest::StatusCode::OK {
            info!(
                app_id = %app.app_id,
                status = %response.status(),
                "validation endpoint rejected token"
            );
            return Err(unauthorized("token rejected"));
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(_) => return Err(unauthorized("validation response was not JSON")),
        };

        match resolve_user_id(&body) {
            Some(user_id) => {
                info!(app_id = %app.app_id, user_id = %user_id, "stream token validated");
                Ok(user_id)
            }
            None => {
                info!(app_id = %app.app_id, "validation response had no usable identity");
                Err(unauthorized("token rejected"))
            }
        }
    }
}

/// Success requires `valid` (when present) to be true, and a user
/// identifier discoverable under one of the well-known keys.
fn resolve_user_id(body: &Value) -> Option<String> {
    if let Some(valid) = body.get("valid") {
        if valid.as_bool() != Some(true) {
            return None;
        }
    }
    for key in USER_ID_KEYS {
        match body.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_id_resolution_order() {
        assert_eq!(
            resolve_user_id(&json!({"user_id": "u1", "id": "other"})),
            Some("u1".to_string())
        );
        assert_eq!(resolve_user_id(&json!({"sub": "s-42"})), Some("s-42".to_string()));
        assert_eq!(resolve_user_id(&json!({"uid": 7})), Some("7".to_string()));
        assert_eq!(resolve_user_id(&json!({"unrelated": true})), None);
    }

    #[test]
    fn explicit_invalid_flag_rejects_despite_identity() {
        assert_eq!(
            resolve_user_id(&json!({"valid": false, "user_id": "u1"})),
            None
        );
        assert_eq!(
            resolve_user_id(&json!({"valid": true, "user_id": "u1"})),
            Some("u1".to_string())
        );
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_half_opens() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(20));
        assert!(breaker.can_proceed().await);
        breaker.record_failure().await;
        assert!(breaker.can_proceed().await);
        breaker.record_failure().await;
        assert!(!breaker.can_proceed().await);

        tokio::time::sleep(Duration::from_millis(30)).await;
        // Half-open: one probe allowed; a failure slams it shut again.
        assert!(breaker.can_proceed().await);
        breaker.record_failure().await;
        assert!(!breaker.can_proceed().await);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(breaker.can_proceed().await);
        breaker.record_success().await;
        assert!(breaker.can_proceed().await);
    }
}
