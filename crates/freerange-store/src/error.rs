//! Store failure taxonomy.

use freerange_core::NotifyError;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Concurrent update detected.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// The store cannot be reached.
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    /// Any other backend failure.
    #[error("store error: {message}")]
    Backend { message: String },
}

impl StoreError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        StoreError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        StoreError::Backend {
            message: message.into(),
        }
    }
}

impl From<diesel::result::Error> for StoreError {
    fn from(error: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match error {
            Error::NotFound => StoreError::not_found("record"),
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StoreError::Conflict {
                    message: info.message().to_string(),
                }
            }
            other => StoreError::Backend {
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Backend {
            message: format!("document serialization: {}", error),
        }
    }
}

impl From<StoreError> for NotifyError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { resource } => NotifyError::NotFound { resource },
            other => NotifyError::Store {
                message: other.to_string(),
            },
        }
    }
}
