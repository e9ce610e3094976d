//! Channel providers.
//!
//! Every provider implements the same contract: given a notification, the
//! recipient, and the owning application, attempt one delivery and report a
//! classified [`ProviderResponse`]. Providers own their per-call timeouts
//! and short in-call retries (1-3 attempts); the worker pool owns the
//! long-horizon retry policy, so providers never sleep for minutes.

mod email;
mod push;
mod sms;
mod stream;
mod webhook;

pub use email::EmailProvider;
pub use push::PushProvider;
pub use sms::SmsProvider;
pub use stream::StreamProvider;
pub use webhook::WebhookProvider;

use std::collections::HashMap;

use async_trait::async_trait;

use freerange_core::{Application, Channel, Notification, User};

/// How a failed send should be treated upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Not an error: the send simply did not happen (e.g. no live stream
    /// subscriber). The notification stays queued.
    None,
    /// The request can never succeed as constructed (missing address,
    /// malformed recipient). Dead-letter immediately.
    Invalid,
    /// Worth retrying with back-off.
    Transient,
    /// The receiving side rejected it definitively. Dead-letter immediately.
    Permanent,
    /// Retry, but not before the rate-limit floor.
    RateLimited,
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub success: bool,
    pub error_kind: ProviderErrorKind,
    pub message: Option<String>,
    pub metadata: HashMap<String, String>,
    pub provider: &'static str,
}

impl ProviderResponse {
    pub fn ok(provider: &'static str) -> Self {
        Self {
            success: true,
            error_kind: ProviderErrorKind::None,
            message: None,
            metadata: HashMap::new(),
            provider,
        }
    }

    pub fn failure(
        provider: &'static str,
        error_kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error_kind,
            message: Some(message.into()),
            metadata: HashMap::new(),
            provider,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// The channel this provider serves.
    fn channel(&self) -> Channel;

    fn healthy(&self) -> bool {
        true
    }

    async fn send(
        &self,
        notification: &Notification,
        user: &User,
        app: &Application,
    ) -> ProviderResponse;
}

/// Classify an HTTP status from a downstream delivery API.
pub(crate) fn classify_status(status: reqwest::StatusCode) -> ProviderErrorKind {
    if status.is_success() {
        ProviderErrorKind::None
    } else if status.as_u16() == 429 {
        ProviderErrorKind::RateLimited
    } else if status.is_client_error() {
        ProviderErrorKind::Permanent
    } else {
        ProviderErrorKind::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_status(reqwest::StatusCode::OK),
            ProviderErrorKind::None
        );
        assert_eq!(
            classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS),
            ProviderErrorKind::RateLimited
        );
        assert_eq!(
            classify_status(reqwest::StatusCode::BAD_REQUEST),
            ProviderErrorKind::Permanent
        );
        assert_eq!(
            classify_status(reqwest::StatusCode::BAD_GATEWAY),
            ProviderErrorKind::Transient
        );
    }
}
