use async_trait::async_trait;
use uuid::Uuid;

use super::entry::{NewOutboxEntry, OutboxEntry};

// ============================================================================
// Outbox Store Ports
// ============================================================================
//
// Two seams:
// - `OutboxSink`: the insert half, implemented by an open transaction so the
//   outbox row commits or rolls back with the aggregate mutation.
// - `OutboxStore`: the relay half, each call individually atomic.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Corrupt row {id}: {reason}")]
    CorruptRow { id: String, reason: String },
}

/// Insert side of the outbox, bound to the caller's transaction
#[async_trait]
pub trait OutboxSink: Send {
    async fn insert_outbox_entry(&mut self, entry: NewOutboxEntry) -> Result<(), StoreError>;
}

/// Relay side of the outbox
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// `PENDING` rows, oldest `created_at` first, at most `batch_size`.
    ///
    /// Rows whose attempts already reached the limit are still returned so the
    /// relay can dead-letter them; terminal rows never are.
    async fn find_unprocessed(&self, batch_size: usize) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Bulk `PENDING → PROCESSED`, stamping `processed_at`. Ids that are
    /// already terminal are left untouched.
    async fn mark_as_processed(&self, ids: &[Uuid]) -> Result<(), StoreError>;

    /// `attempts += 1` and record `last_error`; status unchanged
    async fn increment_attempt(&self, id: Uuid, last_error: &str) -> Result<(), StoreError>;

    /// Terminal `PENDING → FAILED`; `last_error` becomes `"FAILED: {reason}"`
    async fn mark_as_failed(&self, id: Uuid, reason: &str) -> Result<(), StoreError>;
}

pub(crate) fn failed_reason(reason: &str) -> String {
    format!("FAILED: {reason}")
}
