// ============================================================================
// User Events
// ============================================================================
//
// The closed family of events carried through the outbox, plus the codec
// that maps the `event_type` discriminator back to a typed event.
//
// ============================================================================

mod codec;
mod user;

pub use codec::{decode, decoder_for, known_event_types, DecodeError};
pub use user::*;
