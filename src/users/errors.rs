use crate::outbox::{OutboxError, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("User not found: {0}")]
    NotFound(i64),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Outbox(#[from] OutboxError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(detail) | StoreError::Conflict(detail) => {
                ServiceError::Conflict(detail)
            }
            other => ServiceError::Store(other),
        }
    }
}
