use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::messaging::Delivery;

use super::handler::IdempotentConsumer;

/// Feed deliveries from the in-process transport into the idempotent consumer
/// until the channel closes or `shutdown` flips to true.
pub async fn consume_channel(
    mut deliveries: mpsc::Receiver<Delivery>,
    handler: Arc<IdempotentConsumer>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let delivery = tokio::select! {
            delivery = deliveries.recv() => match delivery {
                Some(delivery) => delivery,
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        match handler.handle(&delivery.event).await {
            Ok(outcome) => tracing::debug!(
                routing_key = %delivery.routing_key,
                outcome = outcome.as_str(),
                "Delivery handled"
            ),
            Err(e) => tracing::error!(
                routing_key = %delivery.routing_key,
                error = %e,
                "Delivery handling failed"
            ),
        }
    }

    tracing::info!("In-process consumer stopped");
}
