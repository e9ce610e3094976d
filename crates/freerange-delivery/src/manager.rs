//! Provider manager.
//!
//! Routes a notification to exactly one provider by channel and reports a
//! uniform result. A channel with no registered provider is a permanent
//! failure: there is nothing a retry could change.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use freerange_core::{Application, Channel, Notification, User};

use crate::providers::{Provider, ProviderErrorKind, ProviderResponse};

#[derive(Default)]
pub struct ProviderManager {
    providers: HashMap<Channel, Arc<dyn Provider>>,
}

impl ProviderManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let channel = provider.channel();
        info!(channel = %channel, provider = provider.name(), "provider registered");
        self.providers.insert(channel, provider);
    }

    pub fn provider_for(&self, channel: Channel) -> Option<&Arc<dyn Provider>> {
        self.providers.get(&channel)
    }

    /// Per-provider health, keyed by channel.
    pub fn health(&self) -> HashMap<String, bool> {
        self.providers
            .iter()
            .map(|(channel, provider)| (channel.as_str().to_string(), provider.healthy()))
            .collect()
    }

    pub async fn send(
        &self,
        notification: &Notification,
        user: &User,
        app: &Application,
    ) -> ProviderResponse {
        match self.providers.get(&notification.channel) {
            Some(provider) => provider.send(notification, user, app).await,
            None => ProviderResponse::failure(
                "manager",
                ProviderErrorKind::Permanent,
                format!("unsupported_channel: {}", notification.channel),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use freerange_core::{NotificationContent, Priority};

    struct StaticProvider {
        channel: Channel,
        response: ProviderResponse,
    }

    #[async_trait::async_trait]
    impl Provider for StaticProvider {
        fn name(&self) -> &'static str {
            "static"
        }

        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(
            &self,
            _notification: &Notification,
            _user: &User,
            _app: &Application,
        ) -> ProviderResponse {
            self.response.clone()
        }
    }

    fn fixture(channel: Channel) -> (Notification, User, Application) {
        let now = chrono::Utc::now();
        let notification = Notification::new(
            "a1",
            "u1",
            channel,
            Priority::Normal,
            NotificationContent::default(),
        );
        let user = User {
            user_id: "u1".into(),
            app_id: "a1".into(),
            external_user_id: None,
            email: None,
            phone: None,
            timezone: None,
            language: None,
            webhook_url: None,
            devices: Vec::new(),
            preferences: Default::default(),
            created_at: now,
            updated_at: now,
        };
        let app = Application::new("acme", "key");
        (notification, user, app)
    }

    #[tokio::test]
    async fn routes_by_channel() {
        let mut manager = ProviderManager::new();
        manager.register(Arc::new(StaticProvider {
            channel: Channel::Push,
            response: ProviderResponse::ok("static"),
        }));

        let (n, u, a) = fixture(Channel::Push);
        let response = manager.send(&n, &u, &a).await;
        assert!(response.success);
    }

    #[tokio::test]
    async fn unregistered_channel_is_permanent_failure() {
        let manager = ProviderManager::new();
        let (n, u, a) = fixture(Channel::Sms);
        let response = manager.send(&n, &u, &a).await;
        assert!(!response.success);
        assert_eq!(response.error_kind, ProviderErrorKind::Permanent);
        assert!(response.message.unwrap().contains("unsupported_channel"));
    }
}
