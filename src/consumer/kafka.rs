use kameo::actor::ActorRef;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::Offset;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::actors::{HealthMonitorActor, HealthStatus, UpdateHealth, COMPONENT_CONSUMER};
use crate::config::KafkaConfig;
use crate::events::{decode, EventKind, UserEvent};
use crate::messaging::EVENT_TYPE_HEADER;
use crate::utils::IsTransient;

use super::errors::ConsumerError;
use super::handler::{IdempotentConsumer, Outcome};

// ============================================================================
// Kafka Event Consumer
// ============================================================================
//
// Subscribes to every user-event routing key, decodes each record through
// the shared codec using the `event-type` header, and hands it to the
// idempotent consumer. Offsets are committed after handling, so a crash
// between handling and commit produces a redelivery, which the idempotency
// check absorbs.
//
// A transient failure leaves the offset uncommitted and seeks the partition
// back to the record, so it is delivered again after a pause. Records that
// cannot be decoded, or that the projection rejects, are logged and committed
// past; they would fail the same way on every retry.
//
// ============================================================================

pub struct KafkaEventConsumer {
    consumer: StreamConsumer,
    handler: Arc<IdempotentConsumer>,
    health: Option<ActorRef<HealthMonitorActor>>,
}

/// Pause before a record that failed transiently is read again
const REDELIVERY_BACKOFF: Duration = Duration::from_secs(1);

/// Seek timeout when rewinding a partition
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether the offset of a handled record may be committed.
///
/// Only transient failures keep the record; anything else would fail the
/// same way again.
pub(crate) fn should_commit(result: &Result<Outcome, ConsumerError>) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => !e.is_transient(),
    }
}

impl KafkaEventConsumer {
    pub fn new(config: &KafkaConfig, handler: Arc<IdempotentConsumer>) -> Result<Self, ConsumerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;

        let topics: Vec<&str> = EventKind::ALL.iter().map(|kind| kind.routing_key()).collect();
        consumer.subscribe(&topics)?;

        tracing::info!(
            group = %config.consumer_group,
            topics = ?topics,
            "📥 Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            handler,
            health: None,
        })
    }

    pub fn with_health_monitor(mut self, health: ActorRef<HealthMonitorActor>) -> Self {
        self.health = Some(health);
        self
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut healthy = None;

        loop {
            let received = tokio::select! {
                received = self.consumer.recv() => received,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            match received {
                Ok(message) => {
                    let result = self.process(&message).await;

                    if should_commit(&result) {
                        if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                            tracing::warn!(error = %e, "Failed to commit offset");
                        }
                        if healthy != Some(true) {
                            healthy = Some(true);
                            self.report(HealthStatus::Healthy).await;
                        }
                        continue;
                    }

                    let reason = result.err().map(|e| e.to_string()).unwrap_or_default();
                    if healthy != Some(false) {
                        healthy = Some(false);
                        self.report(HealthStatus::Degraded(reason)).await;
                    }
                    self.rewind(&message);
                    tokio::time::sleep(REDELIVERY_BACKOFF).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "⚠️ Kafka receive failed");
                    if healthy != Some(false) {
                        healthy = Some(false);
                        self.report(HealthStatus::Degraded(e.to_string())).await;
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        tracing::info!("🛑 Kafka consumer stopped");
    }

    async fn process(&self, message: &BorrowedMessage<'_>) -> Result<Outcome, ConsumerError> {
        let event = decode_message(message).inspect_err(|e| {
            tracing::error!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                error = %e,
                "Skipping undecodable record"
            );
        })?;

        let result = self.handler.handle(&event).await;
        match &result {
            Ok(outcome) => {
                tracing::debug!(
                    event_type = event.event_type(),
                    aggregate_id = %event.aggregate_id(),
                    offset = message.offset(),
                    outcome = outcome.as_str(),
                    "Record handled"
                );
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    event_type = event.event_type(),
                    offset = message.offset(),
                    error = %e,
                    "⚠️ Record handling failed, will be redelivered"
                );
            }
            Err(e) => {
                tracing::error!(
                    event_type = event.event_type(),
                    offset = message.offset(),
                    error = %e,
                    "Record rejected, skipping"
                );
            }
        }
        result
    }

    /// Point the partition back at `message` so the next poll returns it again
    fn rewind(&self, message: &BorrowedMessage<'_>) {
        if let Err(e) = self.consumer.seek(
            message.topic(),
            message.partition(),
            Offset::Offset(message.offset()),
            SEEK_TIMEOUT,
        ) {
            tracing::error!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                error = %e,
                "Failed to rewind partition; record stays uncommitted until rebalance"
            );
        }
    }

    async fn report(&self, status: HealthStatus) {
        if let Some(health) = &self.health {
            let _ = health.tell(UpdateHealth::new(COMPONENT_CONSUMER, status)).await;
        }
    }
}

fn decode_message(message: &BorrowedMessage<'_>) -> Result<UserEvent, ConsumerError> {
    let event_type = message
        .headers()
        .and_then(|headers| {
            headers
                .iter()
                .find(|header| header.key == EVENT_TYPE_HEADER)
                .and_then(|header| header.value)
        })
        .and_then(|value| std::str::from_utf8(value).ok())
        .ok_or(ConsumerError::MissingHeader(EVENT_TYPE_HEADER))?;

    let payload = match message.payload_view::<str>() {
        Some(Ok(payload)) => payload,
        _ => "",
    };

    Ok(decode(event_type, payload)?)
}
