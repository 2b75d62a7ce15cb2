use uuid::Uuid;

use crate::events::UserEvent;

use super::entry::NewOutboxEntry;
use super::store::{OutboxSink, StoreError};

// ============================================================================
// Outbox Writer
// ============================================================================
//
// Appends an event to the outbox through the caller's open transaction.
// The writer never commits: whoever opened the transaction decides, so the
// aggregate write and the outbox row are committed or rolled back together.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("Failed to serialize event: {0}")]
    Messaging(#[source] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OutboxWriter;

impl OutboxWriter {
    pub fn new() -> Self {
        Self
    }

    /// Stage `event` as a `PENDING` outbox row inside `tx`.
    ///
    /// Returns the id of the new row.
    pub async fn save<T>(&self, tx: &mut T, event: &UserEvent) -> Result<Uuid, OutboxError>
    where
        T: OutboxSink + ?Sized,
    {
        let entry = NewOutboxEntry::from_event(event).map_err(OutboxError::Messaging)?;
        let id = entry.id;

        tracing::debug!(
            outbox_id = %id,
            event_type = %entry.event_type,
            aggregate_id = %entry.aggregate_id,
            "Staging outbox entry"
        );

        tx.insert_outbox_entry(entry).await?;

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::UserCreated;
    use async_trait::async_trait;

    #[derive(Default)]
    struct CapturingSink {
        rows: Vec<NewOutboxEntry>,
        fail: bool,
    }

    #[async_trait]
    impl OutboxSink for CapturingSink {
        async fn insert_outbox_entry(&mut self, entry: NewOutboxEntry) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Unavailable("disk full".to_string()));
            }
            self.rows.push(entry);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_save_stages_serialized_row() {
        let mut sink = CapturingSink::default();
        let event = UserEvent::from(UserCreated::new(11, "w@example.com", "W"));

        let id = OutboxWriter::new().save(&mut sink, &event).await.unwrap();

        assert_eq!(sink.rows.len(), 1);
        let row = &sink.rows[0];
        assert_eq!(row.id, id);
        assert_eq!(row.event_type, "USER_CREATED");
        assert_eq!(row.aggregate_id, "11");
        assert!(row.payload.contains("\"userId\":11"));
    }

    #[tokio::test]
    async fn test_store_failure_propagates_to_caller() {
        let mut sink = CapturingSink {
            fail: true,
            ..Default::default()
        };
        let event = UserEvent::from(UserCreated::new(12, "x@example.com", "X"));

        let err = OutboxWriter::new().save(&mut sink, &event).await.unwrap_err();

        assert!(matches!(err, OutboxError::Store(StoreError::Unavailable(_))));
        assert!(sink.rows.is_empty());
    }
}
