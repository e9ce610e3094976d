//! Ephemeral presence records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Active,
}

/// Knowledge that a user has a live client attached. TTL-governed by the
/// presence registry; an expired record reads as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub user_id: String,
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_endpoint: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub status: PresenceStatus,
}

impl Presence {
    pub fn check_in(
        user_id: impl Into<String>,
        app_id: impl Into<String>,
        client_endpoint: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            app_id: app_id.into(),
            client_endpoint,
            last_seen: Utc::now(),
            status: PresenceStatus::Active,
        }
    }
}
