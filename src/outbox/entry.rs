use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::events::UserEvent;

// ============================================================================
// Outbox Entry - one row per event awaiting or having completed delivery
// ============================================================================

/// Delivery status of an outbox row.
///
/// `Pending` is the only non-terminal state; the relay moves a row to
/// `Processed` or `Failed` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Processed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processed => "PROCESSED",
            OutboxStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, OutboxStatus::Pending)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "PROCESSED" => Ok(OutboxStatus::Processed),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(format!("unknown outbox status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: String,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Insert-side view of an entry: everything the writer derives from an event
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEntry {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl NewOutboxEntry {
    /// Serialize `event` and derive the row metadata from it
    pub fn from_event(event: &UserEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::now_v7(),
            aggregate_type: event.aggregate_type().to_string(),
            aggregate_id: event.aggregate_id(),
            event_type: event.event_type().to_string(),
            payload: event.to_payload()?,
            created_at: Utc::now(),
        })
    }

    /// The row as it looks right after insert
    pub fn into_pending(self) -> OutboxEntry {
        OutboxEntry {
            id: self.id,
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id,
            event_type: self.event_type,
            payload: self.payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: self.created_at,
            processed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{UserDeleted, UserRegistered};

    #[test]
    fn test_new_entry_derives_metadata_from_event() {
        let event = UserEvent::from(UserRegistered::new("kc-9", "r@example.com", "R"));

        let entry = NewOutboxEntry::from_event(&event).unwrap();

        assert_eq!(entry.aggregate_type, "USER");
        assert_eq!(entry.aggregate_id, "kc-9");
        assert_eq!(entry.event_type, "USER_REGISTERED");
        assert!(entry.payload.contains("\"externalId\":\"kc-9\""));
        assert!(entry.payload.contains("occurredAt"));
    }

    #[test]
    fn test_pending_entry_starts_with_zero_attempts() {
        let event = UserEvent::from(UserDeleted::new(4));
        let entry = NewOutboxEntry::from_event(&event).unwrap().into_pending();

        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.attempts, 0);
        assert!(entry.last_error.is_none());
        assert!(entry.processed_at.is_none());
    }

    #[test]
    fn test_status_parsing_and_terminality() {
        for status in [OutboxStatus::Pending, OutboxStatus::Processed, OutboxStatus::Failed] {
            assert_eq!(status.as_str().parse::<OutboxStatus>().unwrap(), status);
        }
        assert!(!OutboxStatus::Pending.is_terminal());
        assert!(OutboxStatus::Processed.is_terminal());
        assert!(OutboxStatus::Failed.is_terminal());
        assert!("IN_FLIGHT".parse::<OutboxStatus>().is_err());
    }
}
