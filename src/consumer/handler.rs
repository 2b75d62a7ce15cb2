use std::sync::Arc;

use crate::events::UserEvent;
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, RetryConfig};

use super::errors::ConsumerError;
use super::idempotency::IdempotencyStore;
use super::projection::{ApplyOutcome, UserProjection};

// ============================================================================
// Idempotent Consumer
// ============================================================================
//
// Delivery is at-least-once, so every event passes through a check-and-mark
// on its idempotency key before reaching the projection. If applying fails
// the key is released again, so the redelivered copy gets another chance.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Duplicate,
    Stale,
    Ignored,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::Duplicate => "duplicate",
            Outcome::Stale => "stale",
            Outcome::Ignored => "ignored",
        }
    }
}

impl From<ApplyOutcome> for Outcome {
    fn from(outcome: ApplyOutcome) -> Self {
        match outcome {
            ApplyOutcome::Applied => Outcome::Applied,
            ApplyOutcome::Stale => Outcome::Stale,
            ApplyOutcome::Ignored => Outcome::Ignored,
        }
    }
}

pub struct IdempotentConsumer {
    idempotency: Arc<dyn IdempotencyStore>,
    projection: Arc<dyn UserProjection>,
    metrics: Arc<Metrics>,
    retry: RetryConfig,
}

impl IdempotentConsumer {
    pub fn new(
        idempotency: Arc<dyn IdempotencyStore>,
        projection: Arc<dyn UserProjection>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            idempotency,
            projection,
            metrics,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub async fn handle(&self, event: &UserEvent) -> Result<Outcome, ConsumerError> {
        let key = event.idempotency_key();
        let event_type = event.event_type();

        let first = retry_on_transient(self.retry.clone(), |_| self.idempotency.first_seen(&key))
            .await
            .into_result()
            .inspect_err(|_| self.metrics.record_consumer_event(event_type, "failed"))?;

        if !first {
            tracing::debug!(idempotency_key = %key, "Duplicate delivery skipped");
            self.metrics.record_consumer_event(event_type, Outcome::Duplicate.as_str());
            return Ok(Outcome::Duplicate);
        }

        match retry_on_transient(self.retry.clone(), |_| self.projection.apply(event))
            .await
            .into_result()
        {
            Ok(applied) => {
                let outcome = Outcome::from(applied);
                self.metrics.record_consumer_event(event_type, outcome.as_str());
                Ok(outcome)
            }
            Err(e) => {
                if let Err(forget_err) = self.idempotency.forget(&key).await {
                    tracing::error!(
                        idempotency_key = %key,
                        error = %forget_err,
                        "Failed to release idempotency key; redelivery will be skipped"
                    );
                }
                tracing::error!(
                    event_type,
                    aggregate_id = %event.aggregate_id(),
                    error = %e,
                    "❌ Failed to apply event"
                );
                self.metrics.record_consumer_event(event_type, "failed");
                Err(e)
            }
        }
    }
}
