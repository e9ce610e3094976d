//! Recipient identity, devices, and delivery preferences.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::notification::Channel;

/// Device platform for push delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Ios,
    Android,
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Web => "web",
        }
    }
}

/// A registered device with its push token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub platform: Platform,
    pub token: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// Daily quiet-hours window, both bounds as `"HH:MM"` in the user's local
/// zone. Both empty means no quiet hours.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuietHours {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
}

impl QuietHours {
    pub fn is_configured(&self) -> bool {
        !self.start.is_empty() && !self.end.is_empty()
    }
}

/// Per-category preference override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPreference {
    pub enabled: bool,
    /// When non-empty, only these channels are permitted for the category.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_channels: Vec<Channel>,
}

/// User delivery preferences.
///
/// The per-channel flags are tri-state: `Some(true)` / `Some(false)` are
/// explicit user choices, `None` defers to the application default and then
/// the system default. Absent is NOT the same as false; the policy
/// resolution order depends on the distinction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms_enabled: Option<bool>,
    /// Global do-not-disturb. Suppresses everything below critical priority.
    #[serde(default)]
    pub dnd: bool,
    /// Maximum notifications per local day. Zero means unlimited.
    #[serde(default)]
    pub daily_limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiet_hours: Option<QuietHours>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub categories: HashMap<String, CategoryPreference>,
}

impl Preferences {
    /// The user's explicit tri-state flag for a channel, if that channel has
    /// one. Webhook, in-app, and stream channels carry no per-user flag.
    pub fn channel_flag(&self, channel: Channel) -> Option<bool> {
        match channel {
            Channel::Email => self.email_enabled,
            Channel::Push => self.push_enabled,
            Channel::Sms => self.sms_enabled,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// IANA timezone name, e.g. `"America/New_York"`. Unparseable or absent
    /// falls back to UTC for quiet-hours evaluation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Per-user webhook override; takes precedence over the app default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub preferences: Preferences,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Active devices with a usable push token.
    pub fn push_targets(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(|d| d.active && !d.token.is_empty())
    }
}
