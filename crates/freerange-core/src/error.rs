//! Error taxonomy for FreeRangeNotify.
//!
//! Every failure surfaced to a caller is a [`NotifyError`] variant; the HTTP
//! layer maps the variant's [`ErrorCode`] onto the wire envelope. Worker-side
//! provider failures have their own classification in the delivery crate and
//! only reach this taxonomy when they end a notification's lifecycle.

use crate::models::{Channel, NotificationStatus};

pub type NotifyResult<T> = Result<T, NotifyError>;

/// Machine-readable error code carried in the HTTP error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationError,
    Unauthorized,
    InvalidApiKey,
    NotFound,
    RateLimitExceeded,
    DndEnabled,
    QuietHours,
    ChannelDisabled,
    InvalidStatusTransition,
    MaxRetriesExceeded,
    StoreError,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::InvalidApiKey => "INVALID_API_KEY",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::DndEnabled => "DND_ENABLED",
            ErrorCode::QuietHours => "QUIET_HOURS",
            ErrorCode::ChannelDisabled => "CHANNEL_DISABLED",
            ErrorCode::InvalidStatusTransition => "INVALID_STATUS_TRANSITION",
            ErrorCode::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            ErrorCode::StoreError => "STORE_ERROR",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// An admission-policy rejection. Policy rejections happen before
/// persistence; no notification document exists for a rejected request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyRejection {
    #[error("user not found")]
    UserNotFound,

    #[error("user has do-not-disturb enabled")]
    DndEnabled,

    #[error("inside the user's quiet hours window")]
    QuietHours,

    #[error("channel {channel} is disabled for this user")]
    ChannelDisabled { channel: Channel },

    #[error("daily notification limit exceeded")]
    RateLimitExceeded,
}

impl PolicyRejection {
    pub fn code(&self) -> ErrorCode {
        match self {
            PolicyRejection::UserNotFound => ErrorCode::NotFound,
            PolicyRejection::DndEnabled => ErrorCode::DndEnabled,
            PolicyRejection::QuietHours => ErrorCode::QuietHours,
            PolicyRejection::ChannelDisabled { .. } => ErrorCode::ChannelDisabled,
            PolicyRejection::RateLimitExceeded => ErrorCode::RateLimitExceeded,
        }
    }
}

/// Primary error type for service operations.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Malformed or incomplete caller input.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Missing or malformed credentials.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// Credentials presented but not recognized.
    #[error("invalid api key")]
    InvalidApiKey,

    /// Admission rejected by policy.
    #[error(transparent)]
    Policy(#[from] PolicyRejection),

    /// Resource missing, or owned by another tenant (indistinguishable by
    /// design; existence is never leaked across tenants).
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Attempted transition violates the lifecycle state machine.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: NotificationStatus,
        to: NotificationStatus,
    },

    /// Retry requested for a notification that exhausted its budget.
    #[error("max retries exceeded")]
    MaxRetriesExceeded,

    /// Durable store failure.
    #[error("store error: {message}")]
    Store { message: String },

    /// Queue layer failure.
    #[error("queue error: {message}")]
    Queue { message: String },

    /// Configuration problem detected at startup or reload.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Anything else.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl NotifyError {
    pub fn validation(message: impl Into<String>) -> Self {
        NotifyError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        NotifyError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        NotifyError::Internal {
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            NotifyError::Validation { .. } => ErrorCode::ValidationError,
            NotifyError::Unauthorized { .. } => ErrorCode::Unauthorized,
            NotifyError::InvalidApiKey => ErrorCode::InvalidApiKey,
            NotifyError::Policy(rejection) => rejection.code(),
            NotifyError::NotFound { .. } => ErrorCode::NotFound,
            NotifyError::InvalidTransition { .. } => ErrorCode::InvalidStatusTransition,
            NotifyError::MaxRetriesExceeded => ErrorCode::MaxRetriesExceeded,
            NotifyError::Store { .. } => ErrorCode::StoreError,
            NotifyError::Queue { .. } => ErrorCode::Internal,
            NotifyError::Configuration { .. } => ErrorCode::Internal,
            NotifyError::Internal { .. } => ErrorCode::Internal,
        }
    }
}

impl From<serde_json::Error> for NotifyError {
    fn from(error: serde_json::Error) -> Self {
        NotifyError::Internal {
            message: format!("serialization error: {}", error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_rejections_map_to_codes() {
        assert_eq!(PolicyRejection::DndEnabled.code().as_str(), "DND_ENABLED");
        assert_eq!(PolicyRejection::QuietHours.code().as_str(), "QUIET_HOURS");
        assert_eq!(
            PolicyRejection::ChannelDisabled { channel: Channel::Sms }.code().as_str(),
            "CHANNEL_DISABLED"
        );
        assert_eq!(
            PolicyRejection::RateLimitExceeded.code().as_str(),
            "RATE_LIMIT_EXCEEDED"
        );
        // Tenant existence is never leaked: an unknown user is a plain 404.
        assert_eq!(PolicyRejection::UserNotFound.code().as_str(), "NOT_FOUND");
    }

    #[test]
    fn error_codes_are_upper_snake() {
        let err = NotifyError::InvalidTransition {
            from: NotificationStatus::Read,
            to: NotificationStatus::Pending,
        };
        assert_eq!(err.code().as_str(), "INVALID_STATUS_TRANSITION");
    }
}
