use kameo::actor::ActorRef;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::actors::{HealthMonitorActor, HealthStatus, UpdateHealth, COMPONENT_DATABASE, COMPONENT_RELAY};

use super::relay::{OutboxRelay, RelayError, TickOutcome};

// ============================================================================
// Relay Scheduler
// ============================================================================
//
// Drives `OutboxRelay::process_outbox` on a fixed interval until shutdown.
// Missed ticks are delayed rather than bursted, so a slow tick pushes the
// schedule back instead of queueing catch-up ticks.
//
// ============================================================================

/// Consecutive failed ticks before the relay is reported unhealthy
const UNHEALTHY_AFTER: u32 = 3;

pub struct RelayScheduler {
    relay: Arc<OutboxRelay>,
    poll_interval: Duration,
    health: Option<ActorRef<HealthMonitorActor>>,
}

impl RelayScheduler {
    pub fn new(relay: Arc<OutboxRelay>, poll_interval: Duration) -> Self {
        Self {
            relay,
            poll_interval,
            health: None,
        }
    }

    pub fn with_health_monitor(mut self, health: ActorRef<HealthMonitorActor>) -> Self {
        self.health = Some(health);
        self
    }

    /// Run until `shutdown` flips to true. The tick in progress finishes first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures = 0u32;

        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.relay.settings().batch_size,
            max_attempts = self.relay.settings().max_attempts,
            "🚀 Outbox relay scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.relay.process_outbox().await {
                Ok(TickOutcome::Completed(_)) => {
                    consecutive_failures = 0;
                    self.report(COMPONENT_RELAY, HealthStatus::Healthy, None).await;
                    self.report(COMPONENT_DATABASE, HealthStatus::Healthy, None).await;
                }
                Ok(TickOutcome::Skipped) => {}
                Err(e) => {
                    consecutive_failures += 1;
                    let reason = e.to_string();
                    let status = if consecutive_failures >= UNHEALTHY_AFTER {
                        HealthStatus::Unhealthy(reason.clone())
                    } else {
                        HealthStatus::Degraded(reason.clone())
                    };
                    let details = format!("{consecutive_failures} consecutive failed ticks");
                    self.report(COMPONENT_RELAY, status, Some(details)).await;

                    if matches!(e, RelayError::Fetch(_)) {
                        self.report(COMPONENT_DATABASE, HealthStatus::Unhealthy(reason), None)
                            .await;
                    }
                }
            }
        }

        tracing::info!("🛑 Outbox relay scheduler stopped");
    }

    async fn report(&self, component: &str, status: HealthStatus, details: Option<String>) {
        let Some(health) = &self.health else {
            return;
        };

        let mut update = UpdateHealth::new(component, status);
        update.details = details;

        if health.tell(update).await.is_err() {
            tracing::debug!(component, "Health monitor unavailable");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::GetSystemHealth;
    use crate::events::{UserDeleted, UserEvent};
    use crate::messaging::ChannelPublisher;
    use crate::metrics::Metrics;
    use crate::outbox::{NewOutboxEntry, OutboxStatus, RelaySettings};
    use crate::storage::{MemoryStore, StoreOp};
    use kameo::Actor;

    #[tokio::test]
    async fn test_scheduler_drains_outbox_and_stops_on_shutdown() {
        let store = MemoryStore::new();
        let entry = NewOutboxEntry::from_event(&UserEvent::from(UserDeleted::new(1)))
            .unwrap()
            .into_pending();
        let id = entry.id;
        store.seed_entry(entry).await;

        let (publisher, mut deliveries) = ChannelPublisher::new(8);
        let relay = Arc::new(OutboxRelay::new(
            Arc::new(store.clone()),
            Arc::new(publisher),
            Arc::new(Metrics::new().unwrap()),
            RelaySettings::default(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(RelayScheduler::new(relay, Duration::from_millis(10)).run(shutdown_rx));

        let delivery = deliveries.recv().await.unwrap();
        assert_eq!(delivery.routing_key, "user.deleted");

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(store.outbox_entry(id).await.unwrap().status, OutboxStatus::Processed);
    }

    #[tokio::test]
    async fn test_failed_tick_reported_to_health_monitor() {
        let store = MemoryStore::new();
        store.fail_next(StoreOp::FindUnprocessed).await;

        let (publisher, _deliveries) = ChannelPublisher::new(8);
        let relay = Arc::new(OutboxRelay::new(
            Arc::new(store),
            Arc::new(publisher),
            Arc::new(Metrics::new().unwrap()),
            RelaySettings::default(),
        ));
        let monitor = HealthMonitorActor::spawn(HealthMonitorActor::new());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = RelayScheduler::new(relay, Duration::from_secs(60))
            .with_health_monitor(monitor.clone());
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        // The first interval tick fires immediately
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let health = monitor.ask(GetSystemHealth).await.unwrap();
        assert!(matches!(health.components[COMPONENT_RELAY].status, HealthStatus::Degraded(_)));
        assert!(health.components[COMPONENT_DATABASE].status.is_unhealthy());
    }
}
