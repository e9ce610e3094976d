//! Message templates. Managed by the external admin surface; the core only
//! reads them at ingress to render notification content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub template_id: String,
    pub app_id: String,
    #[serde(default)]
    pub name: String,
    /// Title with `{{placeholder}}` substitutions.
    pub title: String,
    /// Body with `{{placeholder}}` substitutions.
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
