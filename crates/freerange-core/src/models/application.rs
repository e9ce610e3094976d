//! Tenant identity and per-application settings.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// HTTP method for the zero-trust validation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationMethod {
    Get,
    Post,
}

impl Default for ValidationMethod {
    fn default() -> Self {
        ValidationMethod::Post
    }
}

/// Where the presented token is placed in the validation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPlacement {
    BodyJson,
    BodyForm,
    Header,
    Query,
    Cookie,
}

impl Default for TokenPlacement {
    fn default() -> Self {
        TokenPlacement::BodyJson
    }
}

/// Configuration for delegating stream-token validation to the tenant's own
/// endpoint. `static_headers` is an opaque map forwarded verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default)]
    pub method: ValidationMethod,
    #[serde(default)]
    pub token_placement: TokenPlacement,
    #[serde(default = "default_token_key")]
    pub token_key: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub static_headers: HashMap<String, String>,
}

fn default_token_key() -> String {
    "token".to_string()
}

/// Application defaults for the tri-state channel resolution. `None` defers
/// to the system default (enabled).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms: Option<bool>,
}

impl ChannelDefaults {
    pub fn flag(&self, channel: super::notification::Channel) -> Option<bool> {
        use super::notification::Channel;
        match channel {
            Channel::Email => self.email,
            Channel::Push => self.push,
            Channel::Sms => self.sms,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Ingress requests per sliding minute. Zero disables the limit.
    #[serde(default)]
    pub rate_limit: u32,
    /// Maximum delivery retries before the dead-letter queue.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_template_id: Option<String>,
    #[serde(default)]
    pub channel_defaults: ChannelDefaults,
    /// Shared secret for webhook HMAC signatures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_config: Option<ValidationConfig>,
    #[serde(default = "default_true")]
    pub enable_webhooks: bool,
    #[serde(default)]
    pub enable_analytics: bool,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            rate_limit: 0,
            retry_attempts: default_retry_attempts(),
            default_template_id: None,
            channel_defaults: ChannelDefaults::default(),
            webhook_secret: None,
            validation_url: None,
            validation_config: None,
            enable_webhooks: true,
            enable_analytics: false,
        }
    }
}

/// A registered tenant. Authenticated by its opaque `api_key`; every
/// notification it emits carries its `app_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub app_id: String,
    pub api_key: String,
    #[serde(default)]
    pub name: String,
    /// Default webhook target when no named target matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Named webhook targets: label -> URL. Templates reference the label;
    /// the webhook provider resolves it at send time.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub webhooks: HashMap<String, String>,
    #[serde(default)]
    pub settings: AppSettings,
    /// Soft-delete flag; inactive applications fail authentication.
    #[serde(default = "default_true")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            app_id: uuid::Uuid::new_v4().to_string(),
            api_key: api_key.into(),
            name: name.into(),
            webhook_url: None,
            webhooks: HashMap::new(),
            settings: AppSettings::default(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Resolve a webhook target: named label first, then the app default.
    pub fn webhook_target(&self, label: Option<&str>) -> Option<&str> {
        if let Some(label) = label {
            if let Some(url) = self.webhooks.get(label) {
                return Some(url.as_str());
            }
        }
        self.webhook_url.as_deref()
    }
}
