//! SMS delivery through an HTTP gateway API.

use serde_json::json;
use tracing::debug;

use freerange_core::config::SmsProviderConfig;
use freerange_core::{Application, Channel, Notification, User};

use super::{classify_status, Provider, ProviderErrorKind, ProviderResponse};

const PROVIDER_NAME: &str = "sms";

pub struct SmsProvider {
    config: SmsProviderConfig,
    client: reqwest::Client,
}

impl SmsProvider {
    pub fn new(config: SmsProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }
}

#[async_trait::async_trait]
impl Provider for SmsProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn healthy(&self) -> bool {
        self.config.enabled && !self.config.api_url.is_empty()
    }

    async fn send(
        &self,
        notification: &Notification,
        user: &User,
        _app: &Application,
    ) -> ProviderResponse {
        if !self.config.enabled || self.config.api_url.is_empty() {
            return ProviderResponse::failure(
                PROVIDER_NAME,
                ProviderErrorKind::Permanent,
                "sms provider disabled or unconfigured",
            );
        }

        let Some(phone) = user.phone.as_deref() else {
            return ProviderResponse::failure(
                PROVIDER_NAME,
                ProviderErrorKind::Invalid,
                "user has no phone number",
            );
        };

        let body = json!({
            "to": phone,
            "from": self.config.sender_id,
            "body": notification.content.body,
            "notification_id": notification.notification_id,
        });

        match self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                debug!(
                    notification_id = %notification.notification_id,
                    %status,
                    "sms gateway responded"
                );
                match classify_status(status) {
                    ProviderErrorKind::None => ProviderResponse::ok(PROVIDER_NAME)
                        .with_metadata("status", status.as_u16().to_string()),
                    kind => ProviderResponse::failure(
                        PROVIDER_NAME,
                        kind,
                        format!("sms gateway returned {}", status),
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
