use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::events::UserEvent;

use super::publisher::{MessagePublisher, TransportError};

// ============================================================================
// In-process Channel Transport
// ============================================================================
//
// Hands events to an in-process consumer over a bounded mpsc channel.
// Used when no broker is configured and by tests.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub routing_key: String,
    pub event: UserEvent,
}

#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<Delivery>,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MessagePublisher for ChannelPublisher {
    async fn publish(&self, routing_key: &str, event: &UserEvent) -> Result<(), TransportError> {
        self.tx
            .send(Delivery {
                routing_key: routing_key.to_string(),
                event: event.clone(),
            })
            .await
            .map_err(|_| TransportError::Closed)?;

        tracing::debug!(
            routing_key = %routing_key,
            event_type = %event.event_type(),
            "Published to in-process channel"
        );

        Ok(())
    }
}
