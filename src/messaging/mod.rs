// ============================================================================
// Messaging - transport adapters behind the `MessagePublisher` port
// ============================================================================

mod channel;
mod publisher;
mod redpanda;

pub use channel::{ChannelPublisher, Delivery};
pub use publisher::{MessagePublisher, TransportError, EVENT_TYPE_HEADER};
pub use redpanda::RedpandaPublisher;
