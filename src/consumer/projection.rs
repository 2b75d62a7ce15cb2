use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::events::UserEvent;

use super::errors::ConsumerError;

// ============================================================================
// User Projection - read model fed by user events
// ============================================================================
//
// Every rule is safe under redelivery and reordering:
// - created/updated/registered are upserts keyed by the natural id
// - an event older than the last one applied to the same user is stale
// - a delete leaves a tombstone, so late updates cannot resurrect the user
// - an email change for an unknown identity is a no-op
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Older than what the read model already reflects
    Stale,
    /// Nothing to change
    Ignored,
}

#[async_trait]
pub trait UserProjection: Send + Sync {
    async fn apply(&self, event: &UserEvent) -> Result<ApplyOutcome, ConsumerError>;
}

/// Local users are keyed by id, identity-side users by external id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UserKey {
    Local(i64),
    External(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedUser {
    pub email: String,
    pub name: String,
    pub deleted: bool,
    pub last_event_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct UserDirectory {
    users: RwLock<HashMap<UserKey, ProjectedUser>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &UserKey) -> Option<ProjectedUser> {
        self.users.read().await.get(key).cloned()
    }

    /// Users that are present and not deleted
    pub async fn active_count(&self) -> usize {
        self.users.read().await.values().filter(|u| !u.deleted).count()
    }

    fn upsert(
        users: &mut HashMap<UserKey, ProjectedUser>,
        key: UserKey,
        email: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> ApplyOutcome {
        match users.get_mut(&key) {
            Some(existing) if existing.deleted || at < existing.last_event_at => ApplyOutcome::Stale,
            Some(existing) => {
                existing.email = email.to_string();
                existing.name = name.to_string();
                existing.last_event_at = at;
                ApplyOutcome::Applied
            }
            None => {
                users.insert(
                    key,
                    ProjectedUser {
                        email: email.to_string(),
                        name: name.to_string(),
                        deleted: false,
                        last_event_at: at,
                    },
                );
                ApplyOutcome::Applied
            }
        }
    }
}

#[async_trait]
impl UserProjection for UserDirectory {
    async fn apply(&self, event: &UserEvent) -> Result<ApplyOutcome, ConsumerError> {
        let mut users = self.users.write().await;

        let outcome = match event {
            UserEvent::Created(e) => {
                Self::upsert(&mut users, UserKey::Local(e.user_id), &e.email, &e.name, e.occurred_at)
            }
            UserEvent::Updated(e) => {
                Self::upsert(&mut users, UserKey::Local(e.user_id), &e.email, &e.name, e.occurred_at)
            }
            UserEvent::Registered(e) => Self::upsert(
                &mut users,
                UserKey::External(e.external_id.clone()),
                &e.email,
                &e.name,
                e.occurred_at,
            ),
            UserEvent::Deleted(e) => match users.get_mut(&UserKey::Local(e.user_id)) {
                Some(existing) if existing.deleted => ApplyOutcome::Ignored,
                Some(existing) => {
                    existing.deleted = true;
                    existing.last_event_at = existing.last_event_at.max(e.occurred_at);
                    ApplyOutcome::Applied
                }
                None => {
                    // Delete overtook the create: record the tombstone anyway
                    users.insert(
                        UserKey::Local(e.user_id),
                        ProjectedUser {
                            email: String::new(),
                            name: String::new(),
                            deleted: true,
                            last_event_at: e.occurred_at,
                        },
                    );
                    ApplyOutcome::Applied
                }
            },
            UserEvent::EmailUpdated(e) => match users.get_mut(&UserKey::External(e.external_id.clone())) {
                None => ApplyOutcome::Ignored,
                Some(existing) if existing.deleted || e.occurred_at < existing.last_event_at => {
                    ApplyOutcome::Stale
                }
                Some(existing) => {
                    existing.email = e.new_email.clone();
                    existing.last_event_at = e.occurred_at;
                    ApplyOutcome::Applied
                }
            },
        };

        tracing::debug!(
            event_type = event.event_type(),
            aggregate_id = %event.aggregate_id(),
            outcome = ?outcome,
            "Projection applied"
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{UserCreated, UserDeleted, UserEmailUpdated, UserRegistered, UserUpdated};
    use chrono::Duration;

    fn created_at(user_id: i64, name: &str, at: DateTime<Utc>) -> UserEvent {
        let mut e = UserCreated::new(user_id, "a@example.com", name);
        e.occurred_at = at;
        e.into()
    }

    fn updated_at(user_id: i64, name: &str, at: DateTime<Utc>) -> UserEvent {
        let mut e = UserUpdated::new(user_id, "a@example.com", name);
        e.occurred_at = at;
        e.into()
    }

    #[tokio::test]
    async fn test_duplicate_create_is_a_single_user() {
        let directory = UserDirectory::new();
        let event = created_at(1, "A", Utc::now());

        directory.apply(&event).await.unwrap();
        directory.apply(&event).await.unwrap();

        assert_eq!(directory.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_older_update_is_stale() {
        let directory = UserDirectory::new();
        let now = Utc::now();

        directory.apply(&updated_at(1, "New", now)).await.unwrap();
        let outcome = directory
            .apply(&created_at(1, "Old", now - Duration::seconds(5)))
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Stale);
        assert_eq!(directory.get(&UserKey::Local(1)).await.unwrap().name, "New");
    }

    #[tokio::test]
    async fn test_tombstone_blocks_late_update() {
        let directory = UserDirectory::new();
        let now = Utc::now();
        directory.apply(&created_at(1, "A", now)).await.unwrap();

        let mut delete = UserDeleted::new(1);
        delete.occurred_at = now + Duration::seconds(1);
        directory.apply(&delete.clone().into()).await.unwrap();
        let again = directory.apply(&delete.into()).await.unwrap();
        let late = directory
            .apply(&updated_at(1, "Zombie", now + Duration::seconds(2)))
            .await
            .unwrap();

        assert_eq!(again, ApplyOutcome::Ignored);
        assert_eq!(late, ApplyOutcome::Stale);
        assert_eq!(directory.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_email_update_for_unknown_identity_is_noop() {
        let directory = UserDirectory::new();

        let outcome = directory
            .apply(&UserEmailUpdated::new("kc-404", "x@example.com").into())
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Ignored);
        assert_eq!(directory.get(&UserKey::External("kc-404".into())).await, None);
    }

    #[tokio::test]
    async fn test_registration_then_email_change() {
        let directory = UserDirectory::new();

        directory
            .apply(&UserRegistered::new("kc-1", "old@example.com", "R").into())
            .await
            .unwrap();
        let mut change = UserEmailUpdated::new("kc-1", "new@example.com");
        change.occurred_at = Utc::now() + Duration::seconds(1);
        directory.apply(&change.into()).await.unwrap();

        let user = directory.get(&UserKey::External("kc-1".into())).await.unwrap();
        assert_eq!(user.email, "new@example.com");
        assert_eq!(user.name, "R");
    }
}
