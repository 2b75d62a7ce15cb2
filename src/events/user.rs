use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// User Domain Events
// ============================================================================
//
// Wire payloads are camelCase JSON objects carrying every field of the event
// plus `occurredAt`. The discriminator is NOT part of the payload: it lives in
// the outbox `event_type` column and in the `event-type` transport header.
//
// Schema changes must stay additive (new optional fields, new kinds) so that
// entries written by an older build still decode.
//
// ============================================================================

/// Aggregate tag stored in `outbox.aggregate_type` for every user event
pub const USER_AGGREGATE: &str = "USER";

/// Discriminator for the closed set of user event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    UserCreated,
    UserUpdated,
    UserDeleted,
    UserRegistered,
    UserEmailUpdated,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::UserCreated,
        EventKind::UserUpdated,
        EventKind::UserDeleted,
        EventKind::UserRegistered,
        EventKind::UserEmailUpdated,
    ];

    /// String stored in `outbox.event_type`
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::UserCreated => "USER_CREATED",
            EventKind::UserUpdated => "USER_UPDATED",
            EventKind::UserDeleted => "USER_DELETED",
            EventKind::UserRegistered => "USER_REGISTERED",
            EventKind::UserEmailUpdated => "USER_EMAIL_UPDATED",
        }
    }

    /// Transport routing key (topic) for this kind
    pub fn routing_key(self) -> &'static str {
        match self {
            EventKind::UserCreated => "user.created",
            EventKind::UserUpdated => "user.updated",
            EventKind::UserDeleted => "user.deleted",
            EventKind::UserRegistered => "auth.user.registered",
            EventKind::UserEmailUpdated => "auth.user.email.updated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// A user row was created locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreated {
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

impl UserCreated {
    pub fn new(user_id: i64, email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
            name: name.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// A user's profile changed; carries the full post-update state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdated {
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

impl UserUpdated {
    pub fn new(user_id: i64, email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
            name: name.into(),
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDeleted {
    pub user_id: i64,
    pub occurred_at: DateTime<Utc>,
}

impl UserDeleted {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            occurred_at: Utc::now(),
        }
    }
}

/// Identity-provider registration, keyed by the externally issued id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRegistered {
    pub external_id: String,
    pub email: String,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

impl UserRegistered {
    pub fn new(
        external_id: impl Into<String>,
        email: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            email: email.into(),
            name: name.into(),
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEmailUpdated {
    pub external_id: String,
    pub new_email: String,
    pub occurred_at: DateTime<Utc>,
}

impl UserEmailUpdated {
    pub fn new(external_id: impl Into<String>, new_email: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            new_email: new_email.into(),
            occurred_at: Utc::now(),
        }
    }
}

// ============================================================================
// Union Type
// ============================================================================

/// Closed union over every event the outbox can carry
#[derive(Debug, Clone, PartialEq)]
pub enum UserEvent {
    Created(UserCreated),
    Updated(UserUpdated),
    Deleted(UserDeleted),
    Registered(UserRegistered),
    EmailUpdated(UserEmailUpdated),
}

impl UserEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            UserEvent::Created(_) => EventKind::UserCreated,
            UserEvent::Updated(_) => EventKind::UserUpdated,
            UserEvent::Deleted(_) => EventKind::UserDeleted,
            UserEvent::Registered(_) => EventKind::UserRegistered,
            UserEvent::EmailUpdated(_) => EventKind::UserEmailUpdated,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn routing_key(&self) -> &'static str {
        self.kind().routing_key()
    }

    pub fn aggregate_type(&self) -> &'static str {
        USER_AGGREGATE
    }

    /// Local numeric id for local events, external identity id otherwise
    pub fn aggregate_id(&self) -> String {
        match self {
            UserEvent::Created(e) => e.user_id.to_string(),
            UserEvent::Updated(e) => e.user_id.to_string(),
            UserEvent::Deleted(e) => e.user_id.to_string(),
            UserEvent::Registered(e) => e.external_id.clone(),
            UserEvent::EmailUpdated(e) => e.external_id.clone(),
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            UserEvent::Created(e) => e.occurred_at,
            UserEvent::Updated(e) => e.occurred_at,
            UserEvent::Deleted(e) => e.occurred_at,
            UserEvent::Registered(e) => e.occurred_at,
            UserEvent::EmailUpdated(e) => e.occurred_at,
        }
    }

    /// Stable identity of one logical event across redeliveries.
    ///
    /// A redelivered outbox entry decodes to the same payload, so the
    /// `(event_type, aggregate_id, occurred_at)` triple is identical on every
    /// delivery of that entry.
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.event_type(),
            self.aggregate_id(),
            self.occurred_at().to_rfc3339_opts(SecondsFormat::Nanos, true)
        )
    }

    /// Serialize the event body (without discriminator) to its JSON payload
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        match self {
            UserEvent::Created(e) => serde_json::to_string(e),
            UserEvent::Updated(e) => serde_json::to_string(e),
            UserEvent::Deleted(e) => serde_json::to_string(e),
            UserEvent::Registered(e) => serde_json::to_string(e),
            UserEvent::EmailUpdated(e) => serde_json::to_string(e),
        }
    }
}

impl From<UserCreated> for UserEvent {
    fn from(event: UserCreated) -> Self {
        UserEvent::Created(event)
    }
}

impl From<UserUpdated> for UserEvent {
    fn from(event: UserUpdated) -> Self {
        UserEvent::Updated(event)
    }
}

impl From<UserDeleted> for UserEvent {
    fn from(event: UserDeleted) -> Self {
        UserEvent::Deleted(event)
    }
}

impl From<UserRegistered> for UserEvent {
    fn from(event: UserRegistered) -> Self {
        UserEvent::Registered(event)
    }
}

impl From<UserEmailUpdated> for UserEvent {
    fn from(event: UserEmailUpdated) -> Self {
        UserEvent::EmailUpdated(event)
    }
}
