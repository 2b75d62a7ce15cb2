use async_trait::async_trait;

use crate::events::UserEvent;

// ============================================================================
// Message Transport Port
// ============================================================================

/// Header carrying the event discriminator alongside the payload
pub const EVENT_TYPE_HEADER: &str = "event-type";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Circuit breaker open for {0}")]
    CircuitOpen(String),

    /// Broker unreachable, delivery timeout, rejected record
    #[error("{0}")]
    Unavailable(String),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Transport closed")]
    Closed,
}

/// Delivers one event under a routing key. No ordering or dedup guarantee.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, routing_key: &str, event: &UserEvent) -> Result<(), TransportError>;
}
