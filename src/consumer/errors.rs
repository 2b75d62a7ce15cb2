use crate::events::DecodeError;
use crate::utils::IsTransient;

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("Idempotency store unavailable: {0}")]
    IdempotencyUnavailable(String),

    #[error("Projection unavailable: {0}")]
    ProjectionUnavailable(String),

    #[error("Projection rejected event: {0}")]
    ProjectionRejected(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Message has no {0} header")]
    MissingHeader(&'static str),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

impl IsTransient for ConsumerError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            ConsumerError::IdempotencyUnavailable(_)
                | ConsumerError::ProjectionUnavailable(_)
                | ConsumerError::Kafka(_)
        )
    }
}

impl From<redis::RedisError> for ConsumerError {
    fn from(err: redis::RedisError) -> Self {
        ConsumerError::IdempotencyUnavailable(err.to_string())
    }
}
