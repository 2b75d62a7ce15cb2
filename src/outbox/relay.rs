use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::events::{decode, EventKind};
use crate::messaging::MessagePublisher;
use crate::metrics::Metrics;

use super::entry::OutboxEntry;
use super::store::{OutboxStore, StoreError};

// ============================================================================
// Outbox Relay
// ============================================================================
//
// One tick:
// 1. Fetch up to `batch_size` PENDING rows, oldest first
// 2. Per row, in order: dead-letter if attempts are exhausted, otherwise
//    decode by `event_type` and publish under the event's routing key
// 3. Bulk-mark every published row PROCESSED in a single store call
//
// A row's failure is recorded against that row only; the rest of the batch
// carries on. A publish that succeeds but whose bulk mark fails is published
// again next tick, so delivery is at-least-once.
//
// Ticks are single-flight: a tick that starts while another is running on the
// same relay returns `TickOutcome::Skipped` without touching the store.
//
// ============================================================================

pub const MAX_ATTEMPTS_EXCEEDED: &str = "max attempts exceeded";

/// What to do with a row whose payload cannot be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFailurePolicy {
    /// Count it as a failed attempt, like a transport error
    Retry,
    /// Move the row to FAILED immediately
    DeadLetter,
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub batch_size: usize,
    pub max_attempts: i32,
    pub decode_failure_policy: DecodeFailurePolicy,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_attempts: 5,
            decode_failure_policy: DecodeFailurePolicy::Retry,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub published: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// Rows whose failure bookkeeping itself failed; they stay PENDING untouched
    pub store_errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(TickReport),
    Skipped,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Failed to fetch outbox batch: {0}")]
    Fetch(#[source] StoreError),

    #[error("Failed to mark {count} published entries as processed: {source}")]
    MarkProcessed {
        count: usize,
        #[source]
        source: StoreError,
    },
}

enum EntryOutcome {
    Published,
    Retried,
    DeadLettered,
    StoreFailed,
}

/// Holds the single-flight flag for the duration of one tick
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn MessagePublisher>,
    metrics: Arc<Metrics>,
    settings: RelaySettings,
    in_flight: AtomicBool,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn MessagePublisher>,
        metrics: Arc<Metrics>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            store,
            publisher,
            metrics,
            settings,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Run one relay tick, or skip it if another tick is still running
    pub async fn process_outbox(&self) -> Result<TickOutcome, RelayError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            tracing::debug!("⏭️ Previous relay tick still running, skipping");
            self.metrics.record_tick("skipped", 0.0);
            return Ok(TickOutcome::Skipped);
        };

        let started = Instant::now();
        let result = self.run_tick().await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(report) => {
                self.metrics.record_tick("completed", elapsed);
                if report.fetched > 0 {
                    tracing::info!(
                        fetched = report.fetched,
                        published = report.published,
                        retried = report.retried,
                        dead_lettered = report.dead_lettered,
                        duration_ms = (elapsed * 1000.0) as u64,
                        "📤 Relay tick completed"
                    );
                }
            }
            Err(e) => {
                self.metrics.record_tick("error", elapsed);
                tracing::error!(error = %e, "❌ Relay tick failed");
            }
        }

        result.map(TickOutcome::Completed)
    }

    async fn run_tick(&self) -> Result<TickReport, RelayError> {
        let entries = self
            .store
            .find_unprocessed(self.settings.batch_size)
            .await
            .map_err(RelayError::Fetch)?;

        let mut report = TickReport {
            fetched: entries.len(),
            ..TickReport::default()
        };
        let mut processed: Vec<Uuid> = Vec::with_capacity(entries.len());

        for entry in &entries {
            match self.relay_entry(entry).await {
                EntryOutcome::Published => processed.push(entry.id),
                EntryOutcome::Retried => report.retried += 1,
                EntryOutcome::DeadLettered => report.dead_lettered += 1,
                EntryOutcome::StoreFailed => report.store_errors += 1,
            }
        }

        if !processed.is_empty() {
            self.store
                .mark_as_processed(&processed)
                .await
                .map_err(|source| RelayError::MarkProcessed {
                    count: processed.len(),
                    source,
                })?;
        }

        report.published = processed.len();
        Ok(report)
    }

    async fn relay_entry(&self, entry: &OutboxEntry) -> EntryOutcome {
        let label = metric_label(&entry.event_type);

        if entry.attempts >= self.settings.max_attempts {
            return self.dead_letter(entry, MAX_ATTEMPTS_EXCEEDED).await;
        }

        let event = match decode(&entry.event_type, &entry.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    event_id = %entry.id,
                    event_type = %entry.event_type,
                    attempts = entry.attempts,
                    error = %e,
                    "Outbox payload could not be decoded"
                );
                self.metrics.record_publish_failure(label, "decode");

                return match self.settings.decode_failure_policy {
                    DecodeFailurePolicy::Retry => self.record_attempt(entry, &e.to_string()).await,
                    DecodeFailurePolicy::DeadLetter => self.dead_letter(entry, &e.to_string()).await,
                };
            }
        };

        match self.publisher.publish(event.routing_key(), &event).await {
            Ok(()) => {
                tracing::debug!(
                    event_id = %entry.id,
                    event_type = %entry.event_type,
                    aggregate_id = %entry.aggregate_id,
                    routing_key = event.routing_key(),
                    "Outbox entry published"
                );
                self.metrics.record_published(label);
                EntryOutcome::Published
            }
            Err(e) => {
                tracing::warn!(
                    event_id = %entry.id,
                    event_type = %entry.event_type,
                    aggregate_id = %entry.aggregate_id,
                    attempts = entry.attempts + 1,
                    error = %e,
                    "⚠️ Publish failed, will retry next tick"
                );
                self.metrics.record_publish_failure(label, "transport");
                self.record_attempt(entry, &e.to_string()).await
            }
        }
    }

    async fn record_attempt(&self, entry: &OutboxEntry, error: &str) -> EntryOutcome {
        match self.store.increment_attempt(entry.id, error).await {
            Ok(()) => EntryOutcome::Retried,
            Err(e) => {
                tracing::error!(
                    event_id = %entry.id,
                    error = %e,
                    "Failed to record outbox attempt"
                );
                EntryOutcome::StoreFailed
            }
        }
    }

    async fn dead_letter(&self, entry: &OutboxEntry, reason: &str) -> EntryOutcome {
        match self.store.mark_as_failed(entry.id, reason).await {
            Ok(()) => {
                tracing::error!(
                    event_id = %entry.id,
                    event_type = %entry.event_type,
                    aggregate_id = %entry.aggregate_id,
                    attempts = entry.attempts,
                    reason = %reason,
                    "💀 Outbox entry dead-lettered"
                );
                self.metrics.record_dead_letter(metric_label(&entry.event_type));
                EntryOutcome::DeadLettered
            }
            Err(e) => {
                tracing::error!(
                    event_id = %entry.id,
                    error = %e,
                    "Failed to dead-letter outbox entry"
                );
                EntryOutcome::StoreFailed
            }
        }
    }
}

/// Metric label for a stored discriminator; unmapped values share one label
fn metric_label(event_type: &str) -> &'static str {
    event_type
        .parse::<EventKind>()
        .map(EventKind::as_str)
        .unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{UserCreated, UserDeleted, UserEvent, UserUpdated};
    use crate::messaging::TransportError;
    use crate::outbox::{NewOutboxEntry, OutboxStatus};
    use crate::storage::{MemoryStore, StoreOp};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(String, UserEvent)>>,
        fail_kind: Option<EventKind>,
        fail_all: Option<String>,
    }

    impl RecordingPublisher {
        fn failing(message: &str) -> Self {
            Self {
                fail_all: Some(message.to_string()),
                ..Self::default()
            }
        }

        fn failing_for(kind: EventKind) -> Self {
            Self {
                fail_kind: Some(kind),
                ..Self::default()
            }
        }

        fn published(&self) -> Vec<(String, UserEvent)> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessagePublisher for RecordingPublisher {
        async fn publish(&self, routing_key: &str, event: &UserEvent) -> Result<(), TransportError> {
            if let Some(message) = &self.fail_all {
                return Err(TransportError::Unavailable(message.clone()));
            }
            if self.fail_kind == Some(event.kind()) {
                return Err(TransportError::Unavailable("broker rejected record".to_string()));
            }
            self.published
                .lock()
                .unwrap()
                .push((routing_key.to_string(), event.clone()));
            Ok(())
        }
    }

    /// Signals `started` and then waits for `release` before succeeding
    struct BlockingPublisher {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl MessagePublisher for BlockingPublisher {
        async fn publish(&self, _routing_key: &str, _event: &UserEvent) -> Result<(), TransportError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    fn relay(store: &MemoryStore, publisher: Arc<dyn MessagePublisher>, settings: RelaySettings) -> OutboxRelay {
        OutboxRelay::new(
            Arc::new(store.clone()),
            publisher,
            Arc::new(Metrics::new().unwrap()),
            settings,
        )
    }

    fn pending(event: &UserEvent, attempts: i32) -> OutboxEntry {
        let mut entry = NewOutboxEntry::from_event(event).unwrap().into_pending();
        entry.attempts = attempts;
        entry
    }

    fn raw_entry(event_type: &str, payload: &str, attempts: i32) -> OutboxEntry {
        let mut entry = pending(&UserEvent::from(UserDeleted::new(0)), attempts);
        entry.event_type = event_type.to_string();
        entry.payload = payload.to_string();
        entry
    }

    #[tokio::test]
    async fn test_user_created_is_published_then_processed() {
        let store = MemoryStore::new();
        let entry = raw_entry(
            "USER_CREATED",
            r#"{"userId":1,"email":"a@example.com","name":"A","occurredAt":"2026-01-01T00:00:00Z"}"#,
            0,
        );
        let id = entry.id;
        store.seed_entry(entry).await;

        let publisher = Arc::new(RecordingPublisher::default());
        let relay = relay(&store, publisher.clone(), RelaySettings::default());

        let outcome = relay.process_outbox().await.unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "user.created");
        assert_eq!(
            published[0].1,
            UserEvent::Created(UserCreated {
                user_id: 1,
                email: "a@example.com".to_string(),
                name: "A".to_string(),
                occurred_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            })
        );

        let stored = store.outbox_entry(id).await.unwrap();
        assert_eq!(stored.status, OutboxStatus::Processed);
        assert!(stored.processed_at.is_some());
        assert!(matches!(outcome, TickOutcome::Completed(TickReport { published: 1, .. })));
    }

    #[tokio::test]
    async fn test_exhausted_entry_is_dead_lettered_without_publish() {
        let store = MemoryStore::new();
        let entry = pending(&UserEvent::from(UserCreated::new(1, "a@example.com", "A")), 5);
        let id = entry.id;
        store.seed_entry(entry).await;

        let publisher = Arc::new(RecordingPublisher::default());
        let relay = relay(&store, publisher.clone(), RelaySettings::default());

        relay.process_outbox().await.unwrap();

        assert!(publisher.published().is_empty());
        let stored = store.outbox_entry(id).await.unwrap();
        assert_eq!(stored.status, OutboxStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("FAILED: max attempts exceeded"));
    }

    #[tokio::test]
    async fn test_publish_error_increments_attempt_and_never_marks_processed() {
        let store = MemoryStore::new();
        let entry = pending(&UserEvent::from(UserUpdated::new(3, "c@example.com", "C")), 0);
        let id = entry.id;
        store.seed_entry(entry).await;

        let publisher = Arc::new(RecordingPublisher::failing("broker unreachable"));
        let relay = relay(&store, publisher, RelaySettings::default());

        let outcome = relay.process_outbox().await.unwrap();

        let stored = store.outbox_entry(id).await.unwrap();
        assert_eq!(stored.status, OutboxStatus::Pending);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.last_error.as_deref(), Some("broker unreachable"));
        assert!(stored.processed_at.is_none());
        assert!(matches!(outcome, TickOutcome::Completed(TickReport { retried: 1, published: 0, .. })));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_the_batch() {
        let store = MemoryStore::new();
        let first = pending(&UserEvent::from(UserCreated::new(1, "a@example.com", "A")), 0);
        let second = pending(&UserEvent::from(UserUpdated::new(1, "a@example.com", "B")), 0);
        let third = pending(&UserEvent::from(UserDeleted::new(2)), 0);
        let ids = [first.id, second.id, third.id];
        for entry in [first, second, third] {
            store.seed_entry(entry).await;
        }

        let publisher = Arc::new(RecordingPublisher::failing_for(EventKind::UserUpdated));
        let relay = relay(&store, publisher.clone(), RelaySettings::default());

        relay.process_outbox().await.unwrap();

        let routing_keys: Vec<String> = publisher.published().into_iter().map(|(k, _)| k).collect();
        assert_eq!(routing_keys, vec!["user.created", "user.deleted"]);
        assert_eq!(store.outbox_entry(ids[0]).await.unwrap().status, OutboxStatus::Processed);
        assert_eq!(store.outbox_entry(ids[1]).await.unwrap().status, OutboxStatus::Pending);
        assert_eq!(store.outbox_entry(ids[2]).await.unwrap().status, OutboxStatus::Processed);
    }

    #[tokio::test]
    async fn test_batch_size_bounds_fetch_in_creation_order() {
        let store = MemoryStore::new();
        for user_id in 1..=5 {
            store
                .seed_entry(pending(&UserEvent::from(UserDeleted::new(user_id)), 0))
                .await;
        }

        let publisher = Arc::new(RecordingPublisher::default());
        let settings = RelaySettings {
            batch_size: 2,
            ..RelaySettings::default()
        };
        let relay = relay(&store, publisher.clone(), settings);

        relay.process_outbox().await.unwrap();

        let ids: Vec<String> = publisher
            .published()
            .into_iter()
            .map(|(_, e)| e.aggregate_id())
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_failing_entry_is_eventually_dead_lettered() {
        let store = MemoryStore::new();
        let entry = pending(&UserEvent::from(UserDeleted::new(9)), 0);
        let id = entry.id;
        store.seed_entry(entry).await;

        let publisher = Arc::new(RecordingPublisher::failing("timeout"));
        let settings = RelaySettings {
            max_attempts: 3,
            ..RelaySettings::default()
        };
        let relay = relay(&store, publisher, settings);

        for _ in 0..3 {
            relay.process_outbox().await.unwrap();
        }
        assert_eq!(store.outbox_entry(id).await.unwrap().attempts, 3);
        assert_eq!(store.outbox_entry(id).await.unwrap().status, OutboxStatus::Pending);

        relay.process_outbox().await.unwrap();

        let stored = store.outbox_entry(id).await.unwrap();
        assert_eq!(stored.status, OutboxStatus::Failed);
        assert_eq!(stored.attempts, 3);
    }

    #[tokio::test]
    async fn test_terminal_entries_are_never_republished() {
        let store = MemoryStore::new();
        store
            .seed_entry(pending(&UserEvent::from(UserDeleted::new(1)), 0))
            .await;

        let publisher = Arc::new(RecordingPublisher::default());
        let relay = relay(&store, publisher.clone(), RelaySettings::default());

        relay.process_outbox().await.unwrap();
        let second = relay.process_outbox().await.unwrap();
        let third = relay.process_outbox().await.unwrap();

        assert_eq!(publisher.published().len(), 1);
        assert!(matches!(second, TickOutcome::Completed(TickReport { fetched: 0, .. })));
        assert!(matches!(third, TickOutcome::Completed(TickReport { fetched: 0, .. })));
    }

    #[tokio::test]
    async fn test_failed_bulk_mark_redelivers_next_tick() {
        let store = MemoryStore::new();
        let entry = pending(&UserEvent::from(UserDeleted::new(1)), 0);
        let id = entry.id;
        store.seed_entry(entry).await;
        store.fail_next(StoreOp::MarkProcessed).await;

        let publisher = Arc::new(RecordingPublisher::default());
        let relay = relay(&store, publisher.clone(), RelaySettings::default());

        let err = relay.process_outbox().await.unwrap_err();
        assert!(matches!(err, RelayError::MarkProcessed { count: 1, .. }));
        assert_eq!(store.outbox_entry(id).await.unwrap().status, OutboxStatus::Pending);

        relay.process_outbox().await.unwrap();

        assert_eq!(publisher.published().len(), 2);
        assert_eq!(store.outbox_entry(id).await.unwrap().status, OutboxStatus::Processed);
    }

    #[tokio::test]
    async fn test_unknown_event_type_counts_as_attempt() {
        let store = MemoryStore::new();
        let entry = raw_entry("USER_ARCHIVED", "{}", 0);
        let id = entry.id;
        store.seed_entry(entry).await;

        let publisher = Arc::new(RecordingPublisher::default());
        let relay = relay(&store, publisher.clone(), RelaySettings::default());

        relay.process_outbox().await.unwrap();

        let stored = store.outbox_entry(id).await.unwrap();
        assert!(publisher.published().is_empty());
        assert_eq!(stored.status, OutboxStatus::Pending);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.last_error.as_deref(), Some("Unknown event type: USER_ARCHIVED"));
    }

    #[tokio::test]
    async fn test_decode_failure_does_not_abort_the_batch() {
        let store = MemoryStore::new();
        let bad = raw_entry("USER_ARCHIVED", "{}", 0);
        let good = pending(&UserEvent::from(UserCreated::new(1, "a@example.com", "A")), 0);
        let (bad_id, good_id) = (bad.id, good.id);
        store.seed_entry(bad).await;
        store.seed_entry(good).await;

        let publisher = Arc::new(RecordingPublisher::default());
        let relay = relay(&store, publisher.clone(), RelaySettings::default());

        let report = match relay.process_outbox().await.unwrap() {
            TickOutcome::Completed(report) => report,
            TickOutcome::Skipped => panic!("tick was skipped"),
        };

        let bad = store.outbox_entry(bad_id).await.unwrap();
        assert_eq!(bad.status, OutboxStatus::Pending);
        assert_eq!(bad.attempts, 1);
        assert_eq!(store.outbox_entry(good_id).await.unwrap().status, OutboxStatus::Processed);
        assert_eq!(publisher.published().len(), 1);
        assert_eq!((report.published, report.retried), (1, 1));
    }

    #[tokio::test]
    async fn test_unknown_event_type_shares_one_metric_label() {
        let store = MemoryStore::new();
        store.seed_entry(raw_entry("USER_ARCHIVED", "{}", 0)).await;
        store.seed_entry(raw_entry("user_created", "{}", 0)).await;

        let metrics = Arc::new(Metrics::new().unwrap());
        let relay = OutboxRelay::new(
            Arc::new(store.clone()),
            Arc::new(RecordingPublisher::default()),
            metrics.clone(),
            RelaySettings::default(),
        );

        relay.process_outbox().await.unwrap();

        let failures = metrics
            .outbox_publish_failures
            .with_label_values(&["unknown", "decode"])
            .get();
        assert_eq!(failures, 2);
        assert_eq!(metric_label("USER_CREATED"), "USER_CREATED");
    }

    #[tokio::test]
    async fn test_malformed_payload_dead_lettered_under_fast_fail() {
        let store = MemoryStore::new();
        let entry = raw_entry("USER_CREATED", r#"{"userId":"not-a-number"}"#, 0);
        let id = entry.id;
        store.seed_entry(entry).await;

        let settings = RelaySettings {
            decode_failure_policy: DecodeFailurePolicy::DeadLetter,
            ..RelaySettings::default()
        };
        let relay = relay(&store, Arc::new(RecordingPublisher::default()), settings);

        relay.process_outbox().await.unwrap();

        let stored = store.outbox_entry(id).await.unwrap();
        assert_eq!(stored.status, OutboxStatus::Failed);
        assert!(stored.last_error.unwrap().starts_with("FAILED: "));
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let store = MemoryStore::new();
        store
            .seed_entry(pending(&UserEvent::from(UserDeleted::new(1)), 0))
            .await;

        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let publisher = Arc::new(BlockingPublisher {
            started: started.clone(),
            release: release.clone(),
        });
        let relay = Arc::new(relay(&store, publisher, RelaySettings::default()));

        let running = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.process_outbox().await })
        };
        started.notified().await;

        let overlapping = relay.process_outbox().await.unwrap();
        assert_eq!(overlapping, TickOutcome::Skipped);

        release.notify_one();
        let first = running.await.unwrap().unwrap();
        assert!(matches!(first, TickOutcome::Completed(TickReport { published: 1, .. })));
    }

    #[tokio::test]
    async fn test_guard_released_after_failed_tick() {
        let store = MemoryStore::new();
        store.fail_next(StoreOp::FindUnprocessed).await;

        let relay = relay(&store, Arc::new(RecordingPublisher::default()), RelaySettings::default());

        assert!(matches!(relay.process_outbox().await, Err(RelayError::Fetch(_))));
        assert!(matches!(
            relay.process_outbox().await.unwrap(),
            TickOutcome::Completed(_)
        ));
    }
}
