//! HTTP error envelope.
//!
//! Every error surfaced to a caller is
//! `{"error": {"code": "<UPPER_SNAKE>", "message": "...", "details": ...}}`
//! with the status implied by the code. Handlers return `Result<_,
//! ApiError>` and rely on `?`.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

use freerange_core::{ErrorCode, NotifyError};

#[derive(Debug)]
pub struct ApiError(pub NotifyError);

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<NotifyError> for ApiError {
    fn from(error: NotifyError) -> Self {
        ApiError(error)
    }
}

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized | ErrorCode::InvalidApiKey => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::DndEnabled | ErrorCode::QuietHours | ErrorCode::ChannelDisabled => {
            StatusCode::FORBIDDEN
        }
        ErrorCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::InvalidStatusTransition | ErrorCode::MaxRetriesExceeded => {
            StatusCode::CONFLICT
        }
        ErrorCode::StoreError | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_body(error: &NotifyError) -> serde_json::Value {
    json!({
        "error": {
            "code": error.code().as_str(),
            "message": error.to_string(),
            "details": serde_json::Value::Null,
        }
    })
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        status_for(self.0.code())
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        HttpResponse::build(self.status_code()).json(error_body(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use freerange_core::PolicyRejection;

    #[test]
    fn policy_rejections_map_to_http_statuses() {
        assert_eq!(
            status_for(NotifyError::from(PolicyRejection::QuietHours).code()),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(NotifyError::from(PolicyRejection::RateLimitExceeded).code()),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(NotifyError::from(PolicyRejection::UserNotFound).code()),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn envelope_shape() {
        let body = error_body(&NotifyError::validation("user_id is required"));
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("user_id"));
    }
}
