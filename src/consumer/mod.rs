// ============================================================================
// Consumer Module
// ============================================================================
//
// Downstream side of the outbox: idempotent handling of user events that may
// arrive more than once and out of order.
//
// ============================================================================

mod channel;
mod errors;
mod handler;
mod idempotency;
mod kafka;
mod local_users;
mod projection;

pub use channel::consume_channel;
pub use errors::ConsumerError;
pub use handler::{IdempotentConsumer, Outcome};
pub use idempotency::{IdempotencyStore, MemoryIdempotencyStore, RedisIdempotencyStore};
pub use kafka::KafkaEventConsumer;
pub use local_users::LocalUserProjection;
pub use projection::{ApplyOutcome, ProjectedUser, UserDirectory, UserKey, UserProjection};
