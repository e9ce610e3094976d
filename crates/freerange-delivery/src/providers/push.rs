//! Push delivery over the FCM HTTP API.
//!
//! Sends one request per active device token and succeeds when at least one
//! device accepts the payload. The `notification_id` rides in the data
//! payload so receivers can deduplicate redelivery after a crash.

use serde_json::json;
use tracing::{debug, warn};

use freerange_core::config::PushProviderConfig;
use freerange_core::{Application, Channel, Notification, User};

use super::{classify_status, Provider, ProviderErrorKind, ProviderResponse};

const PROVIDER_NAME: &str = "fcm";
const IN_CALL_ATTEMPTS: u32 = 2;

pub struct PushProvider {
    config: PushProviderConfig,
    client: reqwest::Client,
}

impl PushProvider {
    pub fn new(config: PushProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    async fn send_to_token(
        &self,
        notification: &Notification,
        token: &str,
    ) -> Result<reqwest::StatusCode, reqwest::Error> {
        let mut data = serde_json::Map::new();
        data.insert("notification_id".into(), json!(notification.notification_id));
        for (key, value) in &notification.content.data {
            data.insert(key.clone(), value.clone());
        }
        let body = json!({
            "to": token,
            "notification": {
                "title": notification.content.title,
                "body": notification.content.body,
            },
            "data": data,
        });
        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("key={}", self.config.server_key))
            .json(&body)
            .send()
            .await?;
        Ok(response.status())
    }
}

#[async_trait::async_trait]
impl Provider for PushProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn channel(&self) -> Channel {
        Channel::Push
    }

    fn healthy(&self) -> bool {
        self.config.enabled && !self.config.server_key.is_empty()
    }

    async fn send(
        &self,
        notification: &Notification,
        user: &User,
        _app: &Application,
    ) -> ProviderResponse {
        if !self.config.enabled {
            return ProviderResponse::failure(
                PROVIDER_NAME,
                ProviderErrorKind::Permanent,
                "push provider disabled",
            );
        }

        let tokens: Vec<&str> = user.push_targets().map(|d| d.token.as_str()).collect();
        if tokens.is_empty() {
            return ProviderResponse::failure(
                PROVIDER_NAME,
                ProviderErrorKind::Invalid,
                "user has no active device tokens",
            );
        }

        let mut delivered = 0usize;
        let mut worst = ProviderErrorKind::None;
        let mut last_error = None;

        for token in &tokens {
            let mut outcome = None;
            for attempt in 1..=IN_CALL_ATTEMPTS {
                match self.send_to_token(notification, token).await {
                    Ok(status) => {
                        outcome = Some(classify_status(status));
                        if status.is_success() || attempt == IN_CALL_ATTEMPTS {
                            break;
                        }
                        if !status.is_server_error() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(
                            notification_id = %notification.notification_id,
                            attempt,
                            error = %e,
                            "push request failed"
                        );
                        last_error = Some(e.to_string());
                        outcome = Some(ProviderErrorKind::Transient);
                        if attempt == IN_CALL_ATTEMPTS {
                            break;
                        }
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
            match outcome {
                Some(ProviderErrorKind::None) => delivered += 1,
                Some(kind) => worst = escalate(worst, kind),
                None => {}
            }
        }

        if delivered > 0 {
            ProviderResponse::ok(PROVIDER_NAME)
                .with_metadata("devices_delivered", delivered.to_string())
                .with_metadata("devices_total", tokens.len().to_string())
        } else {
            warn!(
                notification_id = %notification.notification_id,
                devices = tokens.len(),
                "push delivery failed on every device"
            );
            ProviderResponse::failure(
                PROVIDER_NAME,
                if worst == ProviderErrorKind::None {
                    ProviderErrorKind::Transient
                } else {
                    worst
                },
                last_error.unwrap_or_else(|| "all device sends failed".to_string()),
            )
        }
    }
}

/// Pick the error kind that dominates a mixed set of per-device failures:
/// retryable kinds win over permanent ones, so a fleet with one transient
/// failure keeps its retry budget.
fn escalate(current: ProviderErrorKind, new: ProviderErrorKind) -> ProviderErrorKind {
    use ProviderErrorKind::*;
    match (current, new) {
        (None, k) => k,
        (Transient, _) | (_, Transient) => Transient,
        (RateLimited, _) | (_, RateLimited) => RateLimited,
        (k, _) => k,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_prefers_retryable() {
        use ProviderErrorKind::*;
        assert_eq!(escalate(None, Permanent), Permanent);
        assert_eq!(escalate(Permanent, Transient), Transient);
        assert_eq!(escalate(Transient, Permanent), Transient);
        assert_eq!(escalate(Permanent, RateLimited), RateLimited);
    }
}
