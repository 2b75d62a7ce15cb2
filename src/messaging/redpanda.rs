use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};
use std::time::Duration;

use crate::config::KafkaConfig;
use crate::events::UserEvent;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

use super::publisher::{MessagePublisher, TransportError, EVENT_TYPE_HEADER};

// ============================================================================
// Redpanda / Kafka Transport
// ============================================================================
//
// Topic = routing key, record key = aggregate id, payload = event JSON.
// The `event-type` header carries the discriminator so consumers can decode
// through the shared codec table.
//
// Delivery timeouts come from `message.timeout.ms`; a hung broker therefore
// costs at most that long per entry, never a stalled relay tick.
//
// ============================================================================

pub struct RedpandaPublisher {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
    send_timeout: Duration,
}

impl RedpandaPublisher {
    pub fn new(config: &KafkaConfig) -> Result<Self, TransportError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .create()
            .map_err(|e| TransportError::Unavailable(format!("Failed to create producer: {e}")))?;

        let cb_config = CircuitBreakerConfig {
            failure_threshold: config.circuit_failure_threshold,
            timeout: Duration::from_secs(config.circuit_timeout_secs),
            success_threshold: config.circuit_success_threshold,
        };

        Ok(Self {
            producer,
            circuit_breaker: CircuitBreaker::new(cb_config),
            send_timeout: Duration::from_millis(config.message_timeout_ms),
        })
    }

    /// Shared handle to the breaker, for health reporting
    pub fn circuit_breaker(&self) -> CircuitBreaker {
        self.circuit_breaker.clone()
    }
}

#[async_trait]
impl MessagePublisher for RedpandaPublisher {
    async fn publish(&self, routing_key: &str, event: &UserEvent) -> Result<(), TransportError> {
        let payload = event.to_payload()?;
        let key = event.aggregate_id();

        let result = self
            .circuit_breaker
            .call(async {
                let headers = OwnedHeaders::new()
                    .insert(Header {
                        key: EVENT_TYPE_HEADER,
                        value: Some(event.event_type()),
                    })
                    .insert(Header {
                        key: "content-type",
                        value: Some("application/json"),
                    });

                let record = FutureRecord::to(routing_key)
                    .key(&key)
                    .payload(&payload)
                    .headers(headers);

                self.producer
                    .send(record, Timeout::After(self.send_timeout))
                    .await
                    .map_err(|(e, _)| format!("Kafka send error: {e}"))?;

                Ok::<(), String>(())
            })
            .await;

        match result {
            Ok(_) => {
                tracing::info!(
                    topic = %routing_key,
                    key = %key,
                    event_type = %event.event_type(),
                    "Published to Redpanda"
                );
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(
                    topic = %routing_key,
                    "Circuit breaker open - Redpanda unavailable"
                );
                Err(TransportError::CircuitOpen("Redpanda".to_string()))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(
                    error = %e,
                    topic = %routing_key,
                    "Failed to publish to Redpanda"
                );
                Err(TransportError::Unavailable(e))
            }
        }
    }
}
