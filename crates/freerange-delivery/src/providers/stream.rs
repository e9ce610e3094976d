//! Real-time stream provider.
//!
//! Hands the notification to the in-process broadcaster instead of calling
//! out. A send succeeds only when at least one live connection accepted the
//! frame; with nobody attached the notification stays queued and the
//! presence check-in flush delivers it later.

use std::sync::Arc;

use freerange_core::{Application, Channel, Notification, User};

use crate::broadcaster::Broadcaster;
use super::{Provider, ProviderErrorKind, ProviderResponse};

const PROVIDER_NAME: &str = "stream";

pub struct StreamProvider {
    broadcaster: Arc<Broadcaster>,
    channel: Channel,
}

impl StreamProvider {
    /// One instance serves `stream`, another `in_app`; both share the
    /// broadcaster.
    pub fn new(broadcaster: Arc<Broadcaster>, channel: Channel) -> Self {
        Self {
            broadcaster,
            channel,
        }
    }
}

#[async_trait::async_trait]
impl Provider for StreamProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        notification: &Notification,
        user: &User,
        _app: &Application,
    ) -> ProviderResponse {
        let delivered = self.broadcaster.broadcast(&user.user_id, notification).await;
        if delivered > 0 {
            ProviderResponse::ok(PROVIDER_NAME)
                .with_metadata("connections", delivered.to_string())
        } else {
            // Not a failure: the worker leaves the notification queued for
            // the check-in flush.
            ProviderResponse::failure(
                PROVIDER_NAME,
                ProviderErrorKind::None,
                "no live subscribers",
            )
        }
    }
}
