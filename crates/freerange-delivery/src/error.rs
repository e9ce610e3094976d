//! Queue layer failures.

use freerange_core::NotifyError;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue backend error: {message}")]
    Backend { message: String },

    #[error("queue item serialization: {message}")]
    Serialization { message: String },
}

impl From<redis::RedisError> for QueueError {
    fn from(error: redis::RedisError) -> Self {
        QueueError::Backend {
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(error: serde_json::Error) -> Self {
        QueueError::Serialization {
            message: error.to_string(),
        }
    }
}

impl From<QueueError> for NotifyError {
    fn from(error: QueueError) -> Self {
        NotifyError::Queue {
            message: error.to_string(),
        }
    }
}
