// ============================================================================
// Outbox Module
// ============================================================================
//
// - entry:     row model and status lifecycle
// - store:     persistence ports (transactional insert, relay operations)
// - writer:    appends events inside the caller's transaction
// - relay:     drains PENDING rows to the message transport
// - scheduler: periodic trigger for the relay
//
// ============================================================================

mod entry;
mod relay;
mod scheduler;
mod store;
mod writer;

pub use entry::{NewOutboxEntry, OutboxEntry, OutboxStatus};
pub use relay::{
    DecodeFailurePolicy, OutboxRelay, RelayError, RelaySettings, TickOutcome, TickReport,
    MAX_ATTEMPTS_EXCEEDED,
};
pub use scheduler::RelayScheduler;
pub use store::{OutboxSink, OutboxStore, StoreError};
pub(crate) use store::failed_reason;
pub use writer::{OutboxError, OutboxWriter};
