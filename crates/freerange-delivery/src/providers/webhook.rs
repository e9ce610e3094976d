//! Webhook delivery.
//!
//! POSTs the JSON body of the notification to the resolved target URL.
//! Target resolution: a `webhook` label in the payload data selects a named
//! target from the application's `webhooks` map, then the per-user override,
//! then the application's default URL. When the application carries a
//! shared secret the body is signed with `hex(HMAC-SHA256(secret, body))`
//! in `X-Webhook-Signature`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use freerange_core::config::WebhookProviderConfig;
use freerange_core::{Application, Channel, Notification, User};

use super::{classify_status, Provider, ProviderErrorKind, ProviderResponse};

const PROVIDER_NAME: &str = "webhook";
const USER_AGENT: &str = "FreeRangeNotify-Webhook/1.0";

type HmacSha256 = Hmac<Sha256>;

pub struct WebhookProvider {
    config: WebhookProviderConfig,
    client: reqwest::Client,
}

impl WebhookProvider {
    pub fn new(config: WebhookProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn resolve_target<'a>(
        notification: &'a Notification,
        user: &'a User,
        app: &'a Application,
    ) -> Option<&'a str> {
        let label = notification
            .content
            .data
            .get("webhook")
            .and_then(|v| v.as_str());
        if let Some(label) = label {
            if let Some(url) = app.webhooks.get(label) {
                return Some(url.as_str());
            }
        }
        user.webhook_url.as_deref().or(app.webhook_url.as_deref())
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        // HMAC accepts keys of any length; new_from_slice cannot fail here.
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }
}

#[async_trait::async_trait]
impl Provider for WebhookProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn channel(&self) -> Channel {
        Channel::Webhook
    }

    fn healthy(&self) -> bool {
        self.config.enabled
    }

    async fn send(
        &self,
        notification: &Notification,
        user: &User,
        app: &Application,
    ) -> ProviderResponse {
        if !self.config.enabled || !app.settings.enable_webhooks {
            return ProviderResponse::failure(
                PROVIDER_NAME,
                ProviderErrorKind::Permanent,
                "webhooks disabled",
            );
        }

        let Some(url) = Self::resolve_target(notification, user, app) else {
            return ProviderResponse::failure(
                PROVIDER_NAME,
                ProviderErrorKind::Invalid,
                "no webhook target configured",
            );
        };

        let body = match serde_json::to_vec(notification) {
            Ok(body) => body,
            Err(e) => {
                return ProviderResponse::failure(
                    PROVIDER_NAME,
                    ProviderErrorKind::Permanent,
                    format!("failed to serialize notification: {}", e),
                )
            }
        };

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Notification-ID", notification.notification_id.as_str());
        if let Some(secret) = app.settings.webhook_secret.as_deref() {
            request = request.header("X-Webhook-Signature", Self::sign(secret, &body));
        }

        match request.body(body).send().await {
            Ok(response) => {
                let status = response.status();
                debug!(
                    notification_id = %notification.notification_id,
                    %status,
                    url,
                    "webhook delivered"
                );
                match classify_status(status) {
                    ProviderErrorKind::None => ProviderResponse::ok(PROVIDER_NAME)
                        .with_metadata("status", status.as_u16().to_string()),
                    kind => ProviderResponse::failure(
                        PROVIDER_NAME,
                        kind,
                        format!("webhook target returned {}", status),
                    ),
                }
            }
            Err(e) => ProviderResponse::failure(
                PROVIDER_NAME,
                ProviderErrorKind::Transient,
                e.to_string(),
            ),
        }
    }
}
